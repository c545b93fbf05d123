//! In-memory snapshot of per-host state
//!
//! Everything here is derived from host probes and may be thrown away at
//! any time; the next refresh rebuilds it. Daemons of hosts that stop
//! answering are kept at their last known state instead of being dropped.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use stonectl_api::{DaemonAction, DaemonDescription, Device, ServiceType};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct HostCacheEntry {
    pub daemons: BTreeMap<String, DaemonDescription>,
    pub devices: Vec<Device>,
    pub networks: BTreeMap<String, Vec<String>>,
    pub facts: BTreeMap<String, Value>,
    pub last_daemon_refresh: Option<DateTime<Utc>>,
    pub last_device_refresh: Option<DateTime<Utc>>,
    pub last_facts_refresh: Option<DateTime<Utc>>,
    /// Pending operator actions, consumed by the serve loop
    pub scheduled_daemon_actions: BTreeMap<String, DaemonAction>,
    /// Dispatched deploys not yet confirmed by a refresh
    pub in_flight: BTreeMap<String, DateTime<Utc>>,
    /// Client files written to the host, path to content
    pub client_files: BTreeMap<String, String>,
    /// Devices handed to an in-flight OSD, path to daemon name
    pub claimed_devices: BTreeMap<String, String>,
    daemons_invalidated: bool,
    devices_invalidated: bool,
}

#[derive(Debug, Default)]
pub struct HostCache {
    entries: BTreeMap<String, HostCacheEntry>,
    /// Hosts whose probe failed during the current tick
    failed: BTreeSet<String>,
}

fn due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    last.is_none_or(|t| now - t >= interval)
}

impl HostCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the cache track exactly `hostnames`
    pub fn prime<'a>(&mut self, hostnames: impl IntoIterator<Item = &'a str>) {
        let wanted: BTreeSet<&str> = hostnames.into_iter().collect();
        self.entries.retain(|h, _| wanted.contains(h.as_str()));
        for host in wanted {
            self.entries.entry(host.to_string()).or_default();
        }
    }

    pub fn rm_host(&mut self, host: &str) {
        self.entries.remove(host);
        self.failed.remove(host);
    }

    pub fn hosts(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    #[must_use]
    pub fn entry(&self, host: &str) -> Option<&HostCacheEntry> {
        self.entries.get(host)
    }

    // ------------------------------------------------------------------
    // refresh bookkeeping
    // ------------------------------------------------------------------

    #[must_use]
    pub fn needs_daemon_refresh(&self, host: &str, now: DateTime<Utc>, interval: Duration) -> bool {
        self.entries
            .get(host)
            .is_none_or(|e| e.daemons_invalidated || due(e.last_daemon_refresh, now, interval))
    }

    #[must_use]
    pub fn needs_device_refresh(&self, host: &str, now: DateTime<Utc>, interval: Duration) -> bool {
        self.entries
            .get(host)
            .is_none_or(|e| e.devices_invalidated || due(e.last_device_refresh, now, interval))
    }

    #[must_use]
    pub fn needs_facts_refresh(&self, host: &str, now: DateTime<Utc>, interval: Duration) -> bool {
        self.entries
            .get(host)
            .is_none_or(|e| due(e.last_facts_refresh, now, interval))
    }

    /// Force a daemon re-probe on the next refresh
    pub fn invalidate_host_daemons(&mut self, host: &str) {
        if let Some(entry) = self.entries.get_mut(host) {
            entry.daemons_invalidated = true;
        }
    }

    pub fn invalidate_host_devices(&mut self, host: &str) {
        if let Some(entry) = self.entries.get_mut(host) {
            entry.devices_invalidated = true;
        }
    }

    /// Replace the daemon slice of `host` with a fresh probe result
    ///
    /// In-flight daemons missing from the probe are kept until
    /// `in_flight_timeout` has passed since dispatch.
    pub fn update_host_daemons(
        &mut self,
        host: &str,
        observed: Vec<DaemonDescription>,
        now: DateTime<Utc>,
        in_flight_timeout: Duration,
    ) {
        let entry = self.entries.entry(host.to_string()).or_default();
        let mut next = BTreeMap::new();

        for mut dd in observed {
            let name = dd.name();
            dd.last_refresh = Some(now);
            if let Some(prev) = entry.daemons.get(&name) {
                dd.created = dd.created.or(prev.created);
            }
            if entry.in_flight.remove(&name).is_some() {
                debug!(host, daemon = %name, "in-flight daemon confirmed");
            }
            next.insert(name, dd);
        }

        let expired: Vec<String> = entry
            .in_flight
            .iter()
            .filter(|(_, since)| now - **since > in_flight_timeout)
            .map(|(name, _)| name.clone())
            .collect();
        for name in expired {
            warn!(host, daemon = %name, "in-flight daemon never appeared, dropping");
            entry.in_flight.remove(&name);
        }
        for name in entry.in_flight.keys() {
            if let Some(prev) = entry.daemons.get(name) {
                next.insert(name.clone(), prev.clone());
            }
        }
        // a settled claim keeps its device consumed until the next device probe
        let settled: Vec<String> = entry
            .claimed_devices
            .iter()
            .filter(|(_, daemon)| !entry.in_flight.contains_key(*daemon))
            .map(|(path, _)| path.clone())
            .collect();
        for path in settled {
            entry.claimed_devices.remove(&path);
            for device in entry.devices.iter_mut().filter(|d| d.path == path) {
                device.available = false;
            }
            entry.devices_invalidated = true;
        }

        entry.daemons = next;
        entry.last_daemon_refresh = Some(now);
        entry.daemons_invalidated = false;
    }

    pub fn update_host_devices(&mut self, host: &str, devices: Vec<Device>, now: DateTime<Utc>) {
        let entry = self.entries.entry(host.to_string()).or_default();
        entry.devices = devices;
        entry.last_device_refresh = Some(now);
        entry.devices_invalidated = false;
    }

    pub fn update_host_networks(&mut self, host: &str, networks: BTreeMap<String, Vec<String>>) {
        self.entries.entry(host.to_string()).or_default().networks = networks;
    }

    pub fn update_host_facts(
        &mut self,
        host: &str,
        facts: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) {
        let entry = self.entries.entry(host.to_string()).or_default();
        entry.facts = facts;
        entry.last_facts_refresh = Some(now);
    }

    #[must_use]
    pub fn last_daemon_refresh(&self, host: &str) -> Option<DateTime<Utc>> {
        self.entries.get(host).and_then(|e| e.last_daemon_refresh)
    }

    #[must_use]
    pub fn is_stale(&self, host: &str, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.last_daemon_refresh(host)
            .is_none_or(|t| now - t > stale_after)
    }

    pub fn mark_failed(&mut self, host: &str) {
        self.failed.insert(host.to_string());
    }

    pub fn clear_failed(&mut self) {
        self.failed.clear();
    }

    #[must_use]
    pub fn is_failed(&self, host: &str) -> bool {
        self.failed.contains(host)
    }

    // ------------------------------------------------------------------
    // daemons
    // ------------------------------------------------------------------

    /// Record a daemon that was just dispatched for deployment
    pub fn record_deploy(&mut self, dd: DaemonDescription, now: DateTime<Utc>) {
        let entry = self.entries.entry(dd.hostname.clone()).or_default();
        let name = dd.name();
        entry.in_flight.insert(name.clone(), now);
        entry.daemons.insert(name, dd);
        entry.daemons_invalidated = true;
    }

    pub fn add_daemon(&mut self, dd: DaemonDescription) {
        self.entries
            .entry(dd.hostname.clone())
            .or_default()
            .daemons
            .insert(dd.name(), dd);
    }

    pub fn rm_daemon(&mut self, host: &str, name: &str) -> Option<DaemonDescription> {
        let entry = self.entries.get_mut(host)?;
        entry.in_flight.remove(name);
        entry.claimed_devices.retain(|_, daemon| daemon != name);
        entry.scheduled_daemon_actions.remove(name);
        entry.daemons_invalidated = true;
        entry.daemons.remove(name)
    }

    pub fn set_daemon_status(&mut self, host: &str, name: &str, status: stonectl_api::DaemonStatus) {
        if let Some(dd) = self
            .entries
            .get_mut(host)
            .and_then(|e| e.daemons.get_mut(name))
        {
            dd.status = status;
        }
    }

    #[must_use]
    pub fn get_daemon(&self, name: &str) -> Option<&DaemonDescription> {
        self.entries.values().find_map(|e| e.daemons.get(name))
    }

    #[must_use]
    pub fn get_daemon_on_host(&self, name: &str, host: &str) -> Option<&DaemonDescription> {
        self.entries.get(host).and_then(|e| e.daemons.get(name))
    }

    #[must_use]
    pub fn get_daemons(&self) -> Vec<DaemonDescription> {
        self.entries
            .values()
            .flat_map(|e| e.daemons.values().cloned())
            .collect()
    }

    #[must_use]
    pub fn get_daemons_by_host(&self, host: &str) -> Vec<DaemonDescription> {
        self.entries
            .get(host)
            .map(|e| e.daemons.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_daemons_by_service(&self, service_name: &str) -> Vec<DaemonDescription> {
        self.entries
            .values()
            .flat_map(|e| e.daemons.values())
            .filter(|dd| dd.service_name == service_name)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get_daemons_by_type(&self, daemon_type: &ServiceType) -> Vec<DaemonDescription> {
        self.entries
            .values()
            .flat_map(|e| e.daemons.values())
            .filter(|dd| &dd.daemon_type == daemon_type)
            .cloned()
            .collect()
    }

    /// Number of managed daemons per host
    #[must_use]
    pub fn managed_daemon_counts(&self) -> BTreeMap<String, usize> {
        self.entries
            .iter()
            .map(|(host, e)| (host.clone(), e.daemons.values().filter(|d| d.managed).count()))
            .collect()
    }

    #[must_use]
    pub fn is_in_flight(&self, host: &str, name: &str) -> bool {
        self.entries
            .get(host)
            .is_some_and(|e| e.in_flight.contains_key(name))
    }

    // ------------------------------------------------------------------
    // devices, networks, facts
    // ------------------------------------------------------------------

    #[must_use]
    pub fn devices(&self, host: &str) -> &[Device] {
        self.entries
            .get(host)
            .map(|e| e.devices.as_slice())
            .unwrap_or_default()
    }

    /// Hand a device to the OSD `daemon` that is being deployed on it
    ///
    /// The claim outlives device refreshes and holds until a daemon refresh
    /// confirms the OSD or its in-flight window expires.
    pub fn mark_device_used(&mut self, host: &str, path: &str, daemon: &str) {
        let entry = self.entries.entry(host.to_string()).or_default();
        for device in entry.devices.iter_mut().filter(|d| d.path == path) {
            device.available = false;
            device
                .rejected_reasons
                .push("claimed by a pending OSD".to_string());
        }
        entry
            .claimed_devices
            .insert(path.to_string(), daemon.to_string());
        entry.devices_invalidated = true;
    }

    #[must_use]
    pub fn is_device_claimed(&self, host: &str, path: &str) -> bool {
        self.entries
            .get(host)
            .is_some_and(|e| e.claimed_devices.contains_key(path))
    }

    #[must_use]
    pub fn networks(&self, host: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.entries.get(host).map(|e| &e.networks)
    }

    #[must_use]
    pub fn get_facts(&self, host: &str) -> Option<&BTreeMap<String, Value>> {
        self.entries.get(host).map(|e| &e.facts)
    }

    // ------------------------------------------------------------------
    // scheduled daemon actions
    // ------------------------------------------------------------------

    /// Queue `action`, replacing any action still pending for the daemon
    pub fn schedule_daemon_action(
        &mut self,
        host: &str,
        name: &str,
        action: DaemonAction,
    ) -> Option<DaemonAction> {
        self.entries
            .entry(host.to_string())
            .or_default()
            .scheduled_daemon_actions
            .insert(name.to_string(), action)
    }

    pub fn cancel_daemon_action(&mut self, host: &str, name: &str) -> Option<DaemonAction> {
        self.entries
            .get_mut(host)?
            .scheduled_daemon_actions
            .remove(name)
    }

    pub fn take_scheduled_daemon_actions(&mut self, host: &str) -> BTreeMap<String, DaemonAction> {
        self.entries
            .get_mut(host)
            .map(|e| std::mem::take(&mut e.scheduled_daemon_actions))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // client files
    // ------------------------------------------------------------------

    #[must_use]
    pub fn client_files(&self, host: &str) -> BTreeMap<String, String> {
        self.entries
            .get(host)
            .map(|e| e.client_files.clone())
            .unwrap_or_default()
    }

    pub fn set_client_file(&mut self, host: &str, path: &str, content: &str) {
        self.entries
            .entry(host.to_string())
            .or_default()
            .client_files
            .insert(path.to_string(), content.to_string());
    }

    pub fn rm_client_file(&mut self, host: &str, path: &str) {
        if let Some(entry) = self.entries.get_mut(host) {
            entry.client_files.remove(path);
        }
    }
}

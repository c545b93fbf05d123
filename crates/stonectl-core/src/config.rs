//! Configuration types for the orchestrator

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stonectl_api::HostSpec;

/// A host seeded into the inventory at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Unique hostname
    pub name: String,
    /// Address used to reach the host (defaults to the name)
    pub addr: Option<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

impl HostConfig {
    #[must_use]
    pub fn to_spec(&self) -> HostSpec {
        let mut spec = HostSpec::new(&self.name);
        if let Some(addr) = &self.addr {
            spec.addr.clone_from(addr);
        }
        spec.labels.clone_from(&self.labels);
        spec
    }
}

/// Tuning for the reconciliation loop
///
/// All intervals are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Period of the background tick
    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,
    /// Minimum age before a host's daemon list is probed again
    #[serde(default = "default_daemon_refresh_interval")]
    pub daemon_refresh_interval: u64,
    #[serde(default = "default_device_refresh_interval")]
    pub device_refresh_interval: u64,
    #[serde(default = "default_facts_refresh_interval")]
    pub facts_refresh_interval: u64,
    /// A host without a successful daemon refresh for this long is stale
    #[serde(default = "default_host_stale_after")]
    pub host_stale_after: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    /// How long a dispatched deploy may stay unconfirmed by a refresh
    #[serde(default = "default_in_flight_timeout")]
    pub in_flight_timeout: u64,
    /// Consecutive ok-to-stop refusals before a warning is raised
    #[serde(default = "default_ok_to_stop_warn_after")]
    pub ok_to_stop_warn_after: u32,
    /// Passes run back to back when a pass changed something
    #[serde(default = "default_max_passes_per_tick")]
    pub max_passes_per_tick: u32,
    /// Events kept per daemon or service
    #[serde(default = "default_event_history")]
    pub event_history: usize,
    /// Host agent binary on managed hosts
    #[serde(default = "default_agent_binary")]
    pub agent_binary: String,
}

fn default_tick_interval() -> u64 {
    60
}

fn default_daemon_refresh_interval() -> u64 {
    60
}

fn default_device_refresh_interval() -> u64 {
    1800
}

fn default_facts_refresh_interval() -> u64 {
    60
}

fn default_host_stale_after() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    30
}

fn default_max_concurrent_probes() -> usize {
    10
}

fn default_in_flight_timeout() -> u64 {
    600
}

fn default_ok_to_stop_warn_after() -> u32 {
    5
}

fn default_max_passes_per_tick() -> u32 {
    2
}

fn default_event_history() -> usize {
    20
}

fn default_agent_binary() -> String {
    "stoneadm".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            daemon_refresh_interval: default_daemon_refresh_interval(),
            device_refresh_interval: default_device_refresh_interval(),
            facts_refresh_interval: default_facts_refresh_interval(),
            host_stale_after: default_host_stale_after(),
            probe_timeout: default_probe_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
            in_flight_timeout: default_in_flight_timeout(),
            ok_to_stop_warn_after: default_ok_to_stop_warn_after(),
            max_passes_per_tick: default_max_passes_per_tick(),
            event_history: default_event_history(),
            agent_binary: default_agent_binary(),
        }
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

impl OrchestratorConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    #[must_use]
    pub fn daemon_refresh_interval(&self) -> chrono::Duration {
        secs(self.daemon_refresh_interval)
    }

    #[must_use]
    pub fn device_refresh_interval(&self) -> chrono::Duration {
        secs(self.device_refresh_interval)
    }

    #[must_use]
    pub fn facts_refresh_interval(&self) -> chrono::Duration {
        secs(self.facts_refresh_interval)
    }

    #[must_use]
    pub fn host_stale_after(&self) -> chrono::Duration {
        secs(self.host_stale_after)
    }

    #[must_use]
    pub fn in_flight_timeout(&self) -> chrono::Duration {
        secs(self.in_flight_timeout)
    }
}

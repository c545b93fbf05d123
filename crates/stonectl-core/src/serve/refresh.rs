//! Stage 1: bounded-age, concurrent host refresh

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use stonectl_api::{DaemonDescription, Device, HostStatus};
use stonectl_exec::ExecError;
use tracing::{debug, error, info, instrument, warn};

use super::Pass;
use crate::agent::HostAgent;
use crate::error::CoreError;
use crate::orchestrator::Orchestrator;

/// Which probes are due on one host
#[derive(Debug)]
struct ProbePlan {
    host: String,
    daemons: bool,
    devices: bool,
    facts: bool,
}

#[derive(Debug)]
struct ProbeOutcome {
    host: String,
    daemons: Option<Result<Vec<DaemonDescription>, CoreError>>,
    devices: Option<Result<Vec<Device>, CoreError>>,
    networks: Option<Result<BTreeMap<String, Vec<String>>, CoreError>>,
    facts: Option<Result<BTreeMap<String, Value>, CoreError>>,
}

async fn bounded<T>(
    timeout: Duration,
    probe: impl Future<Output = Result<T, CoreError>>,
) -> Result<T, CoreError> {
    tokio::time::timeout(timeout, probe)
        .await
        .unwrap_or(Err(CoreError::Exec(ExecError::Timeout { timeout })))
}

/// Run the due probes of one host; a failed daemon probe skips the rest
async fn probe_host(agent: HostAgent, plan: ProbePlan, timeout: Duration) -> ProbeOutcome {
    let host = plan.host.as_str();
    let mut outcome = ProbeOutcome {
        host: plan.host.clone(),
        daemons: None,
        devices: None,
        networks: None,
        facts: None,
    };

    if plan.daemons {
        let result = bounded(timeout, agent.list_daemons(host)).await;
        let failed = result.is_err();
        outcome.daemons = Some(result);
        if failed {
            return outcome;
        }
    }
    if plan.devices {
        outcome.devices = Some(bounded(timeout, agent.list_devices(host)).await);
    }
    if plan.facts {
        outcome.networks = Some(bounded(timeout, agent.list_networks(host)).await);
        outcome.facts = Some(bounded(timeout, agent.gather_facts(host)).await);
    }
    outcome
}

impl Orchestrator {
    /// Probe every host whose cached state is older than its interval
    ///
    /// Hosts are probed concurrently, at most `max_concurrent_probes` at a
    /// time. A failed daemon probe marks the host Offline and unreachable
    /// for this pass; a successful one brings an Offline host back to
    /// Normal. Maintenance hosts are never probed.
    ///
    /// # Errors
    /// Only store failures while persisting host status abort the stage.
    #[instrument(skip_all)]
    pub(crate) async fn refresh_hosts_and_daemons(
        &mut self,
        pass: &mut Pass,
    ) -> Result<(), CoreError> {
        let now = pass.now;
        self.cache.clear_failed();
        self.cache
            .prime(self.inventory.hosts().map(|h| h.hostname.as_str()));

        let daemon_interval = self.config.daemon_refresh_interval();
        let device_interval = self.config.device_refresh_interval();
        let facts_interval = self.config.facts_refresh_interval();

        let plans: Vec<ProbePlan> = self
            .inventory
            .hosts()
            .filter(|h| h.status != HostStatus::Maintenance)
            .map(|h| {
                let name = h.hostname.as_str();
                ProbePlan {
                    host: h.hostname.clone(),
                    daemons: h.status == HostStatus::Offline
                        || self.cache.needs_daemon_refresh(name, now, daemon_interval),
                    devices: self.cache.needs_device_refresh(name, now, device_interval),
                    facts: self.cache.needs_facts_refresh(name, now, facts_interval),
                }
            })
            .filter(|p| p.daemons || p.devices || p.facts)
            .collect();
        if plans.is_empty() {
            return Ok(());
        }
        debug!(hosts = plans.len(), "refreshing hosts");

        let timeout = self.config.probe_timeout();
        let agent = self.agent.clone();
        let mut outcomes: Vec<ProbeOutcome> = futures::stream::iter(plans)
            .map(|plan| probe_host(agent.clone(), plan, timeout))
            .buffer_unordered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.host.cmp(&b.host));

        for outcome in outcomes {
            self.apply_probe_outcome(outcome, pass)?;
        }
        Ok(())
    }

    fn apply_probe_outcome(
        &mut self,
        outcome: ProbeOutcome,
        pass: &Pass,
    ) -> Result<(), CoreError> {
        let host = outcome.host.as_str();

        match outcome.daemons {
            Some(Err(e)) => {
                if e.is_transient() {
                    warn!(host, error = %e, "host unreachable, marking offline");
                } else {
                    error!(host, error = %e, "daemon refresh failed, marking host offline");
                }
                self.cache.mark_failed(host);
                self.inventory.set_status(host, HostStatus::Offline)?;
                return Ok(());
            }
            Some(Ok(daemons)) => {
                for daemon in daemons.iter().filter(|d| d.managed) {
                    self.registry.register_observed(daemon);
                }
                self.cache.update_host_daemons(
                    host,
                    daemons,
                    pass.now,
                    self.config.in_flight_timeout(),
                );
                self.prune_registry(host);
                if self.inventory.get(host).map(|h| h.status) == Some(HostStatus::Offline) {
                    info!(host, "host is reachable again");
                    self.inventory.set_status(host, HostStatus::Normal)?;
                }
            }
            None => {}
        }

        match outcome.devices {
            Some(Ok(devices)) => self.cache.update_host_devices(host, devices, pass.now),
            Some(Err(e)) => warn!(host, error = %e, "device refresh failed"),
            None => {}
        }
        match outcome.networks {
            Some(Ok(networks)) => self.cache.update_host_networks(host, networks),
            Some(Err(e)) => warn!(host, error = %e, "network refresh failed"),
            None => {}
        }
        match outcome.facts {
            Some(Ok(facts)) => self.cache.update_host_facts(host, facts, pass.now),
            Some(Err(e)) => warn!(host, error = %e, "facts refresh failed"),
            None => {}
        }
        Ok(())
    }

    /// Forget handles of daemons a refresh no longer finds on their host
    fn prune_registry(&mut self, host: &str) {
        let gone: Vec<String> = self
            .registry
            .names()
            .filter(|name| {
                self.registry
                    .get_daemon(name)
                    .is_some_and(|h| h.hostname() == host)
                    && self.cache.get_daemon_on_host(name, host).is_none()
            })
            .cloned()
            .collect();
        for name in gone {
            self.registry.unregister(&name);
        }
    }
}

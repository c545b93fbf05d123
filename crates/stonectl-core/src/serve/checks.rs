//! Stages 6 to 9: duplicates, strays, OSD removals and follow-up actions

use std::collections::BTreeMap;
use std::sync::Arc;

use stonectl_api::health::codes;
use stonectl_api::{DaemonAction, DaemonDescription, DaemonStatus, EventLevel, OrchestratorEvent};
use tracing::{debug, info, instrument, warn};

use super::Pass;
use crate::error::CoreError;
use crate::orchestrator::Orchestrator;
use crate::osd::RemovalContext;

/// Split copies of one daemon into the one to keep and the ones to remove
///
/// The copy with the best status wins. When the best status is shared no
/// copy is removed; a later refresh has to break the tie.
fn pick_survivor(
    mut copies: Vec<DaemonDescription>,
) -> Option<(DaemonDescription, Vec<DaemonDescription>)> {
    copies.sort_by(|a, b| {
        b.status
            .rank()
            .cmp(&a.status.rank())
            .then_with(|| a.hostname.cmp(&b.hostname))
    });
    let best = copies.first()?.status.rank();
    if copies.iter().filter(|d| d.status.rank() == best).count() > 1 {
        return None;
    }
    let survivor = copies.remove(0);
    Some((survivor, copies))
}

impl Orchestrator {
    /// Remove extra copies of a daemon found on more than one host
    #[instrument(skip_all)]
    pub(crate) async fn check_for_duplicate_daemons(&mut self, pass: &mut Pass) {
        let mut by_name: BTreeMap<String, Vec<DaemonDescription>> = BTreeMap::new();
        for daemon in self.cache.get_daemons() {
            if daemon.managed || self.registry.is_registered(&daemon.name()) {
                by_name.entry(daemon.name()).or_default().push(daemon);
            }
        }

        let services = Arc::clone(&self.services);
        for (name, copies) in by_name.into_iter().filter(|(_, c)| c.len() > 1) {
            let Some((survivor, losers)) = pick_survivor(copies) else {
                warn!(daemon = %name, "duplicate daemon copies tie on status, leaving them");
                continue;
            };
            let handler = match services.get(&survivor.daemon_type) {
                Ok(handler) => handler,
                Err(e) => {
                    warn!(daemon = %name, error = %e, "no handler for duplicate daemon");
                    continue;
                }
            };

            for loser in losers {
                if pass.unreachable.contains(&loser.hostname) {
                    continue;
                }
                info!(daemon = %name, host = %loser.hostname, "removing duplicated daemon");
                match self.remove_daemon(handler, &loser, false).await {
                    Ok(()) => {
                        pass.removed += 1;
                        self.events.record(OrchestratorEvent::daemon(
                            &name,
                            EventLevel::Info,
                            format!("Removed duplicated daemon on host '{}'", loser.hostname),
                        ));
                    }
                    Err(e) => {
                        warn!(daemon = %name, host = %loser.hostname, error = %e, "failed to remove duplicate");
                    }
                }
            }
            self.registry.register_observed(&survivor);
        }
    }

    /// Report daemons that are neither managed nor known to the registry
    pub(crate) fn check_for_strays(&mut self, pass: &mut Pass) {
        for daemon in self.cache.get_daemons() {
            let name = daemon.name();
            if daemon.managed || self.registry.is_registered(&name) {
                continue;
            }
            debug!(daemon = %name, host = %daemon.hostname, "stray daemon");
            pass.health.add(
                codes::STRAY_DAEMON,
                format!(
                    "stray daemon {name} on host {} not managed by stoneadm",
                    daemon.hostname
                ),
            );
        }
    }

    /// Advance every queued OSD removal
    ///
    /// # Errors
    /// Propagates store failures while persisting the queue.
    #[instrument(skip_all)]
    pub(crate) async fn process_removal_queue(&mut self, pass: &mut Pass) -> Result<(), CoreError> {
        if self.osd_queue.is_empty() {
            return Ok(());
        }
        let before = self.osd_queue.len();
        let mut ctx = RemovalContext {
            cluster: self.cluster.as_ref(),
            agent: &self.agent,
            cache: &mut self.cache,
            registry: &mut self.registry,
            events: &mut self.events,
            unreachable: &pass.unreachable,
            now: pass.now,
        };
        self.osd_queue.process_removal_queue(&mut ctx).await?;
        pass.removed += before.saturating_sub(self.osd_queue.len());
        Ok(())
    }

    /// Run start/stop/restart/redeploy requests queued by operators
    ///
    /// Requests for unreachable hosts stay queued; requests for daemons no
    /// longer on their host are dropped.
    #[instrument(skip_all)]
    pub(crate) async fn run_scheduled_daemon_actions(&mut self, pass: &mut Pass) {
        let hosts: Vec<String> = self
            .inventory
            .hostnames()
            .into_iter()
            .filter(|h| !pass.unreachable.contains(h))
            .collect();

        for host in hosts {
            for (name, action) in self.cache.take_scheduled_daemon_actions(&host) {
                let Some(daemon) = self.cache.get_daemon_on_host(&name, &host).cloned() else {
                    debug!(daemon = %name, host = %host, "dropping action for vanished daemon");
                    continue;
                };
                if !self.registry.is_registered(&name) {
                    self.registry.register_observed(&daemon);
                }
                let Some(handle) = self.registry.get_daemon(&name).cloned() else {
                    continue;
                };

                match handle.run(&self.agent, action).await {
                    Ok(()) => {
                        info!(daemon = %name, host = %host, %action, "ran scheduled action");
                        self.events.record(OrchestratorEvent::daemon(
                            &name,
                            EventLevel::Info,
                            format!("{action} {name} on host '{host}'"),
                        ));
                        if action == DaemonAction::Stop {
                            self.cache.set_daemon_status(&host, &name, DaemonStatus::Stopped);
                        } else {
                            self.cache.invalidate_host_daemons(&host);
                        }
                    }
                    Err(e) => {
                        warn!(daemon = %name, host = %host, %action, error = %e, "scheduled action failed");
                        self.events.record(OrchestratorEvent::daemon(
                            &name,
                            EventLevel::Error,
                            format!("Failed to {action} {name} on host '{host}': {e}"),
                        ));
                    }
                }
            }
        }
    }

    /// Point the cluster at daemons deployed since the last post action
    ///
    /// A type stays pending while any of its daemons is still in flight or
    /// has not been seen by a refresh yet.
    #[instrument(skip_all)]
    pub(crate) async fn run_post_actions(&mut self) {
        let pending: Vec<_> = self.pending_post_actions.iter().cloned().collect();
        let services = Arc::clone(&self.services);
        for service_type in pending {
            let handler = match services.get(&service_type) {
                Ok(handler) => handler,
                Err(e) => {
                    warn!(%service_type, error = %e, "dropping post action");
                    self.pending_post_actions.remove(&service_type);
                    continue;
                }
            };
            let daemons: Vec<DaemonDescription> = self
                .cache
                .get_daemons_by_type(&service_type)
                .into_iter()
                .filter(|d| d.managed)
                .collect();
            let settling = daemons.iter().any(|d| {
                d.last_refresh.is_none() || self.cache.is_in_flight(&d.hostname, &d.name())
            });
            if settling {
                debug!(%service_type, "post action waits for daemons to settle");
                continue;
            }

            match handler
                .config_dashboard(self.cluster.as_ref(), &daemons)
                .await
            {
                Ok(()) => {
                    info!(%service_type, daemons = daemons.len(), "post action done");
                    self.pending_post_actions.remove(&service_type);
                }
                Err(e) => warn!(%service_type, error = %e, "post action failed, will retry"),
            }
        }
    }
}

//! The reconciliation tick
//!
//! A tick runs named stages in a fixed order. Every stage is idempotent
//! and reads the state the previous stage left behind, so a crash at any
//! point is recovered by simply running the next tick.
//!
//! 1. refresh hosts and daemons
//! 2. migrate
//! 3. apply all services (deploy and remove, deleted specs, OSDs)
//! 4. per-daemon and per-service failures become health findings
//! 5. ok-to-stop guards every removal
//! 6. duplicate daemons
//! 7. stray daemons
//! 8. OSD removal queue
//! 9. post actions
//! 10. health checks

mod apply;
mod checks;
mod refresh;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use kameo_macros::Reply;
use stonectl_api::health::codes;
use stonectl_api::{DaemonStatus, HostStatus};
use tracing::{info, instrument, warn};

use crate::error::CoreError;
use crate::health::HealthCollector;
use crate::orchestrator::Orchestrator;

/// Scratch state of one pass
#[derive(Debug)]
pub(crate) struct Pass {
    pub now: DateTime<Utc>,
    /// Hosts excluded from scheduling and removal during this pass
    pub unreachable: BTreeSet<String>,
    pub health: HealthCollector,
    pub deployed: usize,
    pub removed: usize,
}

impl Pass {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            unreachable: BTreeSet::new(),
            health: HealthCollector::new(),
            deployed: 0,
            removed: 0,
        }
    }

    fn changed(&self) -> bool {
        self.deployed + self.removed > 0
    }
}

/// What a tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Reply)]
pub struct TickReport {
    /// Passes run back to back within the tick
    pub passes: u32,
    pub deployed: usize,
    pub removed: usize,
    /// Migrations are pending, so nothing was applied
    pub paused: bool,
    pub health_checks: usize,
}

impl Orchestrator {
    /// Run one reconciliation tick
    ///
    /// A pass that deployed or removed something is followed by another,
    /// up to `max_passes_per_tick`, so placements that depend on each other
    /// settle within one tick.
    ///
    /// # Errors
    /// Store failures and migration failures abort the tick; everything
    /// else is reported through health checks.
    #[instrument(skip(self))]
    pub async fn run_tick(&mut self) -> Result<TickReport, CoreError> {
        let mut report = TickReport::default();
        let max_passes = self.config.max_passes_per_tick.max(1);
        loop {
            let pass = self.run_pass().await?;
            report.passes += 1;
            report.deployed += pass.deployed;
            report.removed += pass.removed;
            report.paused = self.migrations.is_ongoing();
            if !pass.changed() || report.passes >= max_passes {
                break;
            }
        }
        report.health_checks = self.health.len();
        info!(
            passes = report.passes,
            deployed = report.deployed,
            removed = report.removed,
            health_checks = report.health_checks,
            "tick finished"
        );
        Ok(report)
    }

    async fn run_pass(&mut self) -> Result<Pass, CoreError> {
        let mut pass = Pass::new(Utc::now());

        self.refresh_hosts_and_daemons(&mut pass).await?;
        pass.unreachable = self.unreachable_hosts(pass.now);

        let migrated = match self.run_migrations(false) {
            Ok(done) => done,
            Err(e) => {
                self.update_health_checks(pass.health);
                return Err(e);
            }
        };

        if migrated {
            self.distribute_client_keyrings(&mut pass).await;
            self.apply_all_services(&mut pass).await?;
            self.check_for_duplicate_daemons(&mut pass).await;
        } else {
            warn!(
                migration = self.migrations.current(),
                "migrations pending, reconciliation paused"
            );
        }

        self.check_for_strays(&mut pass);

        if migrated {
            self.process_removal_queue(&mut pass).await?;
            self.run_scheduled_daemon_actions(&mut pass).await;
            self.run_post_actions().await;
            self.purge_deleted_services()?;
        }

        let health = std::mem::take(&mut pass.health);
        self.update_health_checks(health);
        Ok(pass)
    }

    /// Publish this pass's findings plus host and store conditions
    pub(crate) fn update_health_checks(&mut self, mut health: HealthCollector) {
        let now = Utc::now();
        let stale_after = self.config.host_stale_after();
        for host in self.inventory.hosts() {
            match host.status {
                HostStatus::Maintenance => {
                    health.add(
                        codes::HOST_IN_MAINTENANCE,
                        format!("{} is in maintenance", host.hostname),
                    );
                }
                HostStatus::Offline => {
                    health.add(
                        codes::HOST_UNREACHABLE,
                        format!("{} ({}) is offline", host.hostname, host.addr),
                    );
                }
                HostStatus::Normal => {
                    if self.cache.is_failed(&host.hostname)
                        || self.cache.is_stale(&host.hostname, now, stale_after)
                    {
                        health.add(
                            codes::HOST_UNREACHABLE,
                            format!("{} ({}) has not been refreshed", host.hostname, host.addr),
                        );
                    }
                }
            }
        }

        for daemon in self.cache.get_daemons() {
            if daemon.managed && daemon.status == DaemonStatus::Error {
                health.add(
                    codes::FAILED_DAEMON,
                    format!("daemon {} on {} is in error state", daemon.name(), daemon.hostname),
                );
            }
        }

        for (key, reason) in self.specs.corrupt() {
            health.add(codes::SPEC_CORRUPT, format!("{key}: {reason}"));
        }
        if let Some(reason) = &self.migration_error {
            health.add(codes::MIGRATION_FAILED, reason.clone());
        }
        if let Some(reason) = self.migrations.waiting() {
            health.add(codes::MIGRATION_WAITING, reason.to_string());
        }

        self.health = health.finish();
    }
}

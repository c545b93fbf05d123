//! `OrchestratorActor`: the single owner of orchestrator state
//!
//! Operator calls and reconciliation ticks arrive as messages, so the
//! mailbox serializes them and no lock guards the state.

use std::collections::BTreeMap;
use std::time::Duration;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use serde_json::Value;
use stonectl_api::responses::ServiceDescription;
use stonectl_api::{
    DaemonAction, DaemonDescription, HealthCheck, HostSpec, OrchestratorEvent, OsdRemoval,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::CoreError;
use crate::message::{
    AddDaemon, AddHost, AddHostLabel, Apply, CancelDaemonAction, DescribeService, EnterMaintenance,
    ExitMaintenance, GetEvents, GetFacts, GetHealthChecks, GetMigrationStatus,
    GetOsdRemovalStatus, ListDaemons, ListHosts, MigrationStatus, RemoveDaemons, RemoveHost,
    RemoveHostLabel, RemoveOsds, RemoveService, RunTick, ScheduleDaemonAction, StopRemoveOsds,
};
use crate::migrations::LAST_MIGRATION;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::serve::TickReport;

/// Arguments for spawning an `OrchestratorActor`
pub struct OrchestratorActorArgs {
    pub config: OrchestratorConfig,
    pub collaborators: Collaborators,
}

/// Actor wrapping the [`Orchestrator`]
pub struct OrchestratorActor {
    orchestrator: Orchestrator,
}

impl OrchestratorActor {
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

impl Actor for OrchestratorActor {
    type Args = OrchestratorActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), "OrchestratorActor starting");
        let orchestrator = Orchestrator::open(args.config, args.collaborators).await?;
        Ok(Self { orchestrator })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "OrchestratorActor stopping");
        Ok(())
    }
}

/// Send [`RunTick`] every `interval` until the actor stops
///
/// Ticks are asked, not told, so a slow tick delays the next one instead
/// of piling up in the mailbox.
pub fn spawn_ticker(actor_ref: ActorRef<OrchestratorActor>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !actor_ref.is_alive() {
                break;
            }
            match actor_ref.ask(RunTick).await {
                Ok(report) => {
                    if report.paused {
                        warn!("reconciliation paused until migrations finish");
                    }
                }
                Err(e) => error!(error = %e, "tick failed"),
            }
        }
        info!("ticker stopped");
    })
}

// ============================================================================
// Reconciliation
// ============================================================================

impl Message<RunTick> for OrchestratorActor {
    type Reply = Result<TickReport, CoreError>;

    async fn handle(&mut self, _msg: RunTick, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.orchestrator.run_tick().await
    }
}

impl Message<GetHealthChecks> for OrchestratorActor {
    type Reply = Vec<HealthCheck>;

    async fn handle(
        &mut self,
        _msg: GetHealthChecks,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.health_checks().to_vec()
    }
}

impl Message<GetEvents> for OrchestratorActor {
    type Reply = Vec<OrchestratorEvent>;

    async fn handle(
        &mut self,
        msg: GetEvents,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.events(msg.subject.as_deref())
    }
}

impl Message<GetMigrationStatus> for OrchestratorActor {
    type Reply = MigrationStatus;

    async fn handle(
        &mut self,
        _msg: GetMigrationStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        MigrationStatus {
            current: self.orchestrator.migration_current(),
            last: LAST_MIGRATION,
            error: self.orchestrator.migration_error().map(ToString::to_string),
            waiting: self.orchestrator.migration_waiting().map(ToString::to_string),
        }
    }
}

// ============================================================================
// Services
// ============================================================================

impl Message<Apply> for OrchestratorActor {
    type Reply = Result<Vec<String>, CoreError>;

    async fn handle(&mut self, msg: Apply, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let results = self.orchestrator.apply(msg.specs)?;
        if msg.immediate
            && let Err(e) = self.orchestrator.run_tick().await
        {
            warn!(error = %e, "immediate tick after apply failed");
        }
        Ok(results)
    }
}

impl Message<RemoveService> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(
        &mut self,
        msg: RemoveService,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.remove_service(&msg.service_name)
    }
}

impl Message<DescribeService> for OrchestratorActor {
    type Reply = Vec<ServiceDescription>;

    async fn handle(
        &mut self,
        msg: DescribeService,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator
            .describe_service(msg.service_type.as_deref(), msg.service_name.as_deref())
    }
}

// ============================================================================
// Daemons
// ============================================================================

impl Message<AddDaemon> for OrchestratorActor {
    type Reply = Result<Vec<String>, CoreError>;

    async fn handle(&mut self, msg: AddDaemon, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.orchestrator.add_daemon(msg.spec).await
    }
}

impl Message<RemoveDaemons> for OrchestratorActor {
    type Reply = Result<Vec<String>, CoreError>;

    async fn handle(
        &mut self,
        msg: RemoveDaemons,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.remove_daemons(&msg.names, msg.force).await
    }
}

impl Message<ScheduleDaemonAction> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(
        &mut self,
        msg: ScheduleDaemonAction,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.schedule_daemon_action(&msg.name, msg.action)
    }
}

impl Message<CancelDaemonAction> for OrchestratorActor {
    type Reply = Result<Option<DaemonAction>, CoreError>;

    async fn handle(
        &mut self,
        msg: CancelDaemonAction,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.cancel_daemon_action(&msg.name)
    }
}

impl Message<ListDaemons> for OrchestratorActor {
    type Reply = Vec<DaemonDescription>;

    async fn handle(
        &mut self,
        msg: ListDaemons,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator
            .list_daemons(msg.host.as_deref(), msg.service_type.as_deref())
    }
}

// ============================================================================
// Hosts
// ============================================================================

impl Message<AddHost> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(&mut self, msg: AddHost, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.orchestrator.add_host(msg.spec).await
    }
}

impl Message<RemoveHost> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(
        &mut self,
        msg: RemoveHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.remove_host(&msg.hostname, msg.force).await
    }
}

impl Message<ListHosts> for OrchestratorActor {
    type Reply = Vec<HostSpec>;

    async fn handle(&mut self, _msg: ListHosts, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.orchestrator.list_hosts()
    }
}

impl Message<AddHostLabel> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(
        &mut self,
        msg: AddHostLabel,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.add_host_label(&msg.hostname, &msg.label)
    }
}

impl Message<RemoveHostLabel> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(
        &mut self,
        msg: RemoveHostLabel,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.remove_host_label(&msg.hostname, &msg.label)
    }
}

impl Message<EnterMaintenance> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(
        &mut self,
        msg: EnterMaintenance,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator
            .enter_host_maintenance(&msg.hostname, msg.force)
            .await
    }
}

impl Message<ExitMaintenance> for OrchestratorActor {
    type Reply = Result<String, CoreError>;

    async fn handle(
        &mut self,
        msg: ExitMaintenance,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.exit_host_maintenance(&msg.hostname).await
    }
}

impl Message<GetFacts> for OrchestratorActor {
    type Reply = Result<BTreeMap<String, Value>, CoreError>;

    async fn handle(&mut self, msg: GetFacts, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.orchestrator.get_facts(&msg.hostname)
    }
}

// ============================================================================
// OSD removal
// ============================================================================

impl Message<RemoveOsds> for OrchestratorActor {
    type Reply = Result<Vec<String>, CoreError>;

    async fn handle(&mut self, msg: RemoveOsds, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.orchestrator
            .remove_osds(&msg.ids, msg.replace, msg.force, msg.zap)
    }
}

impl Message<StopRemoveOsds> for OrchestratorActor {
    type Reply = Result<Vec<String>, CoreError>;

    async fn handle(
        &mut self,
        msg: StopRemoveOsds,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.stop_remove_osds(&msg.ids).await
    }
}

impl Message<GetOsdRemovalStatus> for OrchestratorActor {
    type Reply = Vec<OsdRemoval>;

    async fn handle(
        &mut self,
        _msg: GetOsdRemovalStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.orchestrator.remove_osds_status()
    }
}

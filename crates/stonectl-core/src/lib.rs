//! stonectl-core: Reconciliation control loop and orchestration logic
//!
//! Holds every durable store (inventory, service specs, client keyrings,
//! OSD removal queue, migration state), the in-memory host cache and the
//! serve loop that converges the cluster on the stored specs. The
//! `OrchestratorActor` wraps it all behind a kameo mailbox.

pub mod actor;
pub mod agent;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod inventory;
pub mod keyrings;
pub mod message;
pub mod migrations;
pub mod orchestrator;
pub mod osd;
pub mod placement;
pub mod registry;
pub mod serve;
pub mod services;
pub mod spec_store;
pub mod store;

pub use actor::{OrchestratorActor, OrchestratorActorArgs, spawn_ticker};
pub use agent::HostAgent;
pub use cache::HostCache;
pub use cluster::{CliClusterClient, ClusterClient, MonCommandResult};
pub use config::{HostConfig, OrchestratorConfig};
pub use error::{CoreError, PlacementError, StoreError};
pub use message::{
    AddDaemon, AddHost, AddHostLabel, Apply, CancelDaemonAction, DescribeService, EnterMaintenance,
    ExitMaintenance, GetEvents, GetFacts, GetHealthChecks, GetMigrationStatus,
    GetOsdRemovalStatus, ListDaemons, ListHosts, MigrationStatus, RemoveDaemons, RemoveHost,
    RemoveHostLabel, RemoveOsds, RemoveService, RunTick, ScheduleDaemonAction, StopRemoveOsds,
};
pub use orchestrator::{Collaborators, Orchestrator};
pub use placement::{HostAssignment, PlacementResult};
pub use serve::TickReport;
pub use services::{ServiceHandler, ServiceRegistry};
pub use store::{FileStore, KvStore, MemoryStore, StoreOp};

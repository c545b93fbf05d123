//! stonectl-api: Shared data model and API schemas
//!
//! Contains the host, service spec, placement and daemon types consumed by
//! the reconciliation core, plus the request/response and event types used
//! by the daemon's HTTP surface.

pub mod daemon;
pub mod events;
pub mod health;
pub mod host;
pub mod osd;
pub mod requests;
pub mod responses;
pub mod spec;

pub use daemon::{DaemonAction, DaemonDescription, DaemonStatus, Device};
pub use events::{EventKind, EventLevel, OrchestratorEvent};
pub use health::{HealthCheck, HealthSeverity};
pub use host::{HostSpec, HostStatus};
pub use osd::OsdRemoval;
pub use spec::{
    ClientKeyringSpec, HostPlacementSpec, PlacementSpec, ServiceSpec, ServiceType, SpecError,
};

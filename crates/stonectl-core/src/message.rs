//! Message types for actor communication
//!
//! Message handlers are implemented in `actor::orchestrator`. Every
//! operator operation and the periodic tick go through the same mailbox,
//! so they never interleave.

use kameo_macros::Reply;
use stonectl_api::{DaemonAction, HostSpec, ServiceSpec};

// ============================================================================
// Reconciliation
// ============================================================================

/// Run one reconciliation tick
#[derive(Debug)]
pub struct RunTick;

/// Current health checks
#[derive(Debug)]
pub struct GetHealthChecks;

/// Recorded events, optionally for one daemon or service only
#[derive(Debug, Default)]
pub struct GetEvents {
    pub subject: Option<String>,
}

/// Migration version the store is at
#[derive(Debug)]
pub struct GetMigrationStatus;

/// Migration progress
#[derive(Debug, Clone, PartialEq, Eq, Reply)]
pub struct MigrationStatus {
    pub current: u32,
    pub last: u32,
    /// Error of the last failed attempt
    pub error: Option<String>,
    /// Why the next migration has not run yet
    pub waiting: Option<String>,
}

// ============================================================================
// Services
// ============================================================================

/// Store specs for the serve loop to converge on
#[derive(Debug)]
pub struct Apply {
    pub specs: Vec<ServiceSpec>,
    /// Run a tick right after storing the specs
    pub immediate: bool,
}

/// Mark a service deleted so the serve loop removes its daemons
#[derive(Debug)]
pub struct RemoveService {
    pub service_name: String,
}

/// Describe stored services with their live status
#[derive(Debug, Default)]
pub struct DescribeService {
    pub service_type: Option<String>,
    pub service_name: Option<String>,
}

// ============================================================================
// Daemons
// ============================================================================

/// Deploy daemons of an unmanaged spec right away
#[derive(Debug)]
pub struct AddDaemon {
    pub spec: ServiceSpec,
}

/// Remove named daemons right away
#[derive(Debug)]
pub struct RemoveDaemons {
    pub names: Vec<String>,
    /// Skip the ok-to-stop check
    pub force: bool,
}

/// Queue a lifecycle action for the next tick
#[derive(Debug)]
pub struct ScheduleDaemonAction {
    pub name: String,
    pub action: DaemonAction,
}

/// Drop a queued lifecycle action
#[derive(Debug)]
pub struct CancelDaemonAction {
    pub name: String,
}

/// Cached daemons, optionally filtered
#[derive(Debug, Default)]
pub struct ListDaemons {
    pub host: Option<String>,
    pub service_type: Option<String>,
}

// ============================================================================
// Hosts
// ============================================================================

#[derive(Debug)]
pub struct AddHost {
    pub spec: HostSpec,
}

#[derive(Debug)]
pub struct RemoveHost {
    pub hostname: String,
    /// Remove even if daemons are still placed on the host
    pub force: bool,
}

#[derive(Debug)]
pub struct ListHosts;

#[derive(Debug)]
pub struct AddHostLabel {
    pub hostname: String,
    pub label: String,
}

#[derive(Debug)]
pub struct RemoveHostLabel {
    pub hostname: String,
    pub label: String,
}

/// Stop every daemon on a host and exclude it from reconciliation
#[derive(Debug)]
pub struct EnterMaintenance {
    pub hostname: String,
    /// Skip the ok-to-stop checks
    pub force: bool,
}

#[derive(Debug)]
pub struct ExitMaintenance {
    pub hostname: String,
}

/// Facts last gathered from a host
#[derive(Debug)]
pub struct GetFacts {
    pub hostname: String,
}

// ============================================================================
// OSD removal
// ============================================================================

/// Queue OSDs for drain-then-destroy removal
#[derive(Debug)]
pub struct RemoveOsds {
    pub ids: Vec<u32>,
    /// Keep the ids reserved for replacement disks
    pub replace: bool,
    /// Do not wait for placement groups to drain
    pub force: bool,
    /// Wipe the backing devices afterwards
    pub zap: bool,
}

#[derive(Debug)]
pub struct StopRemoveOsds {
    pub ids: Vec<u32>,
}

#[derive(Debug)]
pub struct GetOsdRemovalStatus;

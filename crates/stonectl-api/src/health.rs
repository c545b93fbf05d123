//! Health check facts exposed to the status surface

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check codes
pub mod codes {
    pub const STRAY_DAEMON: &str = "STONEADM_STRAY_DAEMON";
    pub const DAEMON_PLACE_FAIL: &str = "STONEADM_DAEMON_PLACE_FAIL";
    pub const APPLY_SPEC_FAIL: &str = "STONEADM_APPLY_SPEC_FAIL";
    pub const INVALID_CONFIG_OPTION: &str = "STONEADM_INVALID_CONFIG_OPTION";
    pub const HOST_UNREACHABLE: &str = "STONEADM_HOST_UNREACHABLE";
    pub const HOST_IN_MAINTENANCE: &str = "STONEADM_HOST_IN_MAINTENANCE";
    pub const FAILED_DAEMON: &str = "STONEADM_FAILED_DAEMON";
    pub const DAEMON_STOP_BLOCKED: &str = "STONEADM_DAEMON_STOP_BLOCKED";
    pub const SPEC_CORRUPT: &str = "STONEADM_SPEC_CORRUPT";
    pub const MIGRATION_FAILED: &str = "STONEADM_MIGRATION_FAILED";
    pub const MIGRATION_WAITING: &str = "STONEADM_MIGRATION_WAITING";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthSeverity {
    Warning,
    Error,
}

/// A named, counted health fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthCheck {
    pub code: String,
    pub severity: HealthSeverity,
    pub summary: String,
    pub count: usize,
    pub detail: Vec<String>,
}

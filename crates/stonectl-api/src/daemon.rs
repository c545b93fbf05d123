//! Daemon and device types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::events::OrchestratorEvent;
use crate::spec::ServiceType;

/// Observed status of a daemon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DaemonStatus {
    Starting,
    Running,
    Stopped,
    Error,
    #[default]
    Unknown,
}

impl DaemonStatus {
    /// Total preference order used to pick a survivor among duplicates
    ///
    /// `running > starting > stopped > error > unknown`
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            DaemonStatus::Running => 4,
            DaemonStatus::Starting => 3,
            DaemonStatus::Stopped => 2,
            DaemonStatus::Error => 1,
            DaemonStatus::Unknown => 0,
        }
    }

    /// Parse the `state` field reported by the host agent
    #[must_use]
    pub fn from_state(state: &str) -> Self {
        match state {
            "running" => DaemonStatus::Running,
            "starting" => DaemonStatus::Starting,
            "stopped" => DaemonStatus::Stopped,
            "error" => DaemonStatus::Error,
            _ => DaemonStatus::Unknown,
        }
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DaemonStatus::Starting => "starting",
            DaemonStatus::Running => "running",
            DaemonStatus::Stopped => "stopped",
            DaemonStatus::Error => "error",
            DaemonStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One daemon instance on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DaemonDescription {
    #[schema(value_type = String)]
    pub daemon_type: ServiceType,
    pub daemon_id: String,
    pub hostname: String,
    #[serde(default)]
    pub status: DaemonStatus,
    pub service_name: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub container_image_digest: Option<String>,
    /// When the daemon was deployed
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// When the daemon was last observed by a host refresh
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    /// Deployed by this orchestrator (as opposed to found on the host)
    #[serde(default)]
    pub managed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<OrchestratorEvent>,
}

impl DaemonDescription {
    pub fn new(
        daemon_type: ServiceType,
        daemon_id: impl Into<String>,
        hostname: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            daemon_type,
            daemon_id: daemon_id.into(),
            hostname: hostname.into(),
            status: DaemonStatus::Unknown,
            service_name: service_name.into(),
            ports: Vec::new(),
            container_image_digest: None,
            created: None,
            last_refresh: None,
            managed: false,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: DaemonStatus) -> Self {
        self.status = status;
        self
    }

    /// `daemon_type.daemon_id`, unique cluster-wide
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}.{}", self.daemon_type, self.daemon_id)
    }

    /// Split a daemon name into type and id
    #[must_use]
    pub fn parse_name(name: &str) -> Option<(ServiceType, String)> {
        let (daemon_type, daemon_id) = name.split_once('.')?;
        if daemon_type.is_empty() || daemon_id.is_empty() {
            return None;
        }
        Some((ServiceType::from(daemon_type), daemon_id.to_string()))
    }
}

/// Operator-requested lifecycle action on a single daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DaemonAction {
    Start,
    Stop,
    Restart,
    Redeploy,
}

impl fmt::Display for DaemonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DaemonAction::Start => "start",
            DaemonAction::Stop => "stop",
            DaemonAction::Restart => "restart",
            DaemonAction::Redeploy => "redeploy",
        };
        f.write_str(s)
    }
}

/// Block device reported by a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Device {
    pub path: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub size_bytes: u64,
    /// Free to be consumed by a new OSD
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub rejected_reasons: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name() {
        let (t, id) = DaemonDescription::parse_name("rgw.myrgw.myhost.myid").unwrap();
        assert_eq!(t, ServiceType::Rgw);
        assert_eq!(id, "myrgw.myhost.myid");
        assert!(DaemonDescription::parse_name("osd").is_none());
        assert!(DaemonDescription::parse_name(".1").is_none());
    }

    #[test]
    fn test_status_rank_is_total() {
        let mut all = [
            DaemonStatus::Unknown,
            DaemonStatus::Running,
            DaemonStatus::Error,
            DaemonStatus::Starting,
            DaemonStatus::Stopped,
        ];
        all.sort_by_key(|s| std::cmp::Reverse(s.rank()));
        assert_eq!(
            all,
            [
                DaemonStatus::Running,
                DaemonStatus::Starting,
                DaemonStatus::Stopped,
                DaemonStatus::Error,
                DaemonStatus::Unknown,
            ]
        );
    }
}

//! Host inventory types

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Label marking hosts that receive the admin keyring and config files
pub const ADMIN_LABEL: &str = "_admin";

/// Administrative status of a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Reachable and schedulable
    #[default]
    Normal,
    /// Failed its last connectivity probe
    Offline,
    /// Deliberately taken out of service by an operator
    Maintenance,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Normal => write!(f, "normal"),
            HostStatus::Offline => write!(f, "offline"),
            HostStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// A host known to the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HostSpec {
    /// Unique hostname
    pub hostname: String,
    /// Address used to reach the host (defaults to the hostname)
    #[serde(default)]
    pub addr: String,
    /// Labels used by label-based placement
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Current status
    #[serde(default)]
    pub status: HostStatus,
}

impl HostSpec {
    /// Create a host whose address equals its hostname
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            addr: hostname.clone(),
            hostname,
            labels: BTreeSet::new(),
            status: HostStatus::Normal,
        }
    }

    /// Set the address
    #[must_use]
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Offline and maintenance hosts never see daemon churn
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == HostStatus::Normal
    }
}

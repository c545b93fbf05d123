//! Service specification and placement types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Validation errors for service specs and placements
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// The service type needs a `service_id`
    #[error("service type {0} requires a service_id")]
    MissingServiceId(String),

    /// The service type must not carry a `service_id`
    #[error("service type {0} does not accept a service_id")]
    UnexpectedServiceId(String),

    /// More than one host selector is set
    #[error("placement may only use one of hosts, label or host_pattern")]
    ConflictingSelectors,

    /// Host pattern is not a valid glob
    #[error("invalid host pattern {pattern:?}: {reason}")]
    InvalidHostPattern {
        /// The offending pattern
        pattern: String,
        /// Parser message
        reason: String,
    },

    /// Count of zero daemons
    #[error("placement count must be at least 1")]
    ZeroCount,

    /// Malformed `host[:network][=name]` string
    #[error("invalid host placement {0:?}")]
    InvalidHostPlacement(String),
}

// ============================================================================
// Service types
// ============================================================================

/// Kind of service (and of its daemons)
///
/// Unknown names observed on hosts are kept as `Other` so that stray
/// detection can still report them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceType {
    Mon,
    Mgr,
    Mds,
    Osd,
    Crash,
    Rgw,
    Nfs,
    Iscsi,
    RbdMirror,
    Prometheus,
    Grafana,
    Alertmanager,
    NodeExporter,
    Container,
    Other(String),
}

impl ServiceType {
    /// Every service type the engine knows how to manage
    pub const KNOWN: [ServiceType; 14] = [
        ServiceType::Mon,
        ServiceType::Mgr,
        ServiceType::Mds,
        ServiceType::Osd,
        ServiceType::Crash,
        ServiceType::Rgw,
        ServiceType::Nfs,
        ServiceType::Iscsi,
        ServiceType::RbdMirror,
        ServiceType::Prometheus,
        ServiceType::Grafana,
        ServiceType::Alertmanager,
        ServiceType::NodeExporter,
        ServiceType::Container,
    ];

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ServiceType::Mon => "mon",
            ServiceType::Mgr => "mgr",
            ServiceType::Mds => "mds",
            ServiceType::Osd => "osd",
            ServiceType::Crash => "crash",
            ServiceType::Rgw => "rgw",
            ServiceType::Nfs => "nfs",
            ServiceType::Iscsi => "iscsi",
            ServiceType::RbdMirror => "rbd-mirror",
            ServiceType::Prometheus => "prometheus",
            ServiceType::Grafana => "grafana",
            ServiceType::Alertmanager => "alertmanager",
            ServiceType::NodeExporter => "node-exporter",
            ServiceType::Container => "container",
            ServiceType::Other(name) => name,
        }
    }

    /// Services whose daemons are distinguished by a user-chosen id
    #[must_use]
    pub fn requires_service_id(&self) -> bool {
        matches!(
            self,
            ServiceType::Mds
                | ServiceType::Rgw
                | ServiceType::Nfs
                | ServiceType::Iscsi
                | ServiceType::Container
        )
    }

    /// Services that exist at most once per cluster and never take an id
    #[must_use]
    pub fn forbids_service_id(&self) -> bool {
        matches!(self, ServiceType::Mon | ServiceType::Mgr)
    }
}

impl From<String> for ServiceType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "mon" => ServiceType::Mon,
            "mgr" => ServiceType::Mgr,
            "mds" => ServiceType::Mds,
            "osd" => ServiceType::Osd,
            "crash" => ServiceType::Crash,
            "rgw" => ServiceType::Rgw,
            "nfs" => ServiceType::Nfs,
            "iscsi" => ServiceType::Iscsi,
            "rbd-mirror" => ServiceType::RbdMirror,
            "prometheus" => ServiceType::Prometheus,
            "grafana" => ServiceType::Grafana,
            "alertmanager" => ServiceType::Alertmanager,
            "node-exporter" => ServiceType::NodeExporter,
            "container" => ServiceType::Container,
            _ => ServiceType::Other(value),
        }
    }
}

impl From<&str> for ServiceType {
    fn from(value: &str) -> Self {
        ServiceType::from(value.to_string())
    }
}

impl From<ServiceType> for String {
    fn from(value: ServiceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Placement
// ============================================================================

/// One explicit placement slot: a host, optionally with network and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "RawHostPlacement")]
pub struct HostPlacementSpec {
    pub hostname: String,
    pub network: String,
    /// Disambiguates several instances of one service on the same host
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHostPlacement {
    Text(String),
    Full {
        hostname: String,
        #[serde(default)]
        network: String,
        #[serde(default)]
        name: String,
    },
}

impl TryFrom<RawHostPlacement> for HostPlacementSpec {
    type Error = SpecError;

    fn try_from(raw: RawHostPlacement) -> Result<Self, Self::Error> {
        match raw {
            RawHostPlacement::Text(text) => text.parse(),
            RawHostPlacement::Full {
                hostname,
                network,
                name,
            } => {
                if hostname.is_empty() {
                    return Err(SpecError::InvalidHostPlacement(hostname));
                }
                Ok(Self {
                    hostname,
                    network,
                    name,
                })
            }
        }
    }
}

impl std::str::FromStr for HostPlacementSpec {
    type Err = SpecError;

    /// Parse `host[:network][=name]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, name) = match s.split_once('=') {
            Some((rest, name)) => (rest, name.to_string()),
            None => (s, String::new()),
        };
        let (hostname, network) = match rest.split_once(':') {
            Some((host, network)) => (host, network.to_string()),
            None => (rest, String::new()),
        };
        if hostname.is_empty() {
            return Err(SpecError::InvalidHostPlacement(s.to_string()));
        }
        Ok(Self {
            hostname: hostname.to_string(),
            network,
            name,
        })
    }
}

impl HostPlacementSpec {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            network: String::new(),
            name: String::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Display for HostPlacementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostname)?;
        if !self.network.is_empty() {
            write!(f, ":{}", self.network)?;
        }
        if !self.name.is_empty() {
            write!(f, "={}", self.name)?;
        }
        Ok(())
    }
}

/// Rule turning a spec into concrete host assignments
///
/// At most one of `hosts`, `label` and `host_pattern` is set. `count` alone
/// lets the scheduler pick hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlacementSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostPlacementSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl PlacementSpec {
    /// Count-only placement
    #[must_use]
    pub fn count(count: u32) -> Self {
        Self {
            count: Some(count),
            ..Self::default()
        }
    }

    /// Explicit host list
    pub fn hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| HostPlacementSpec::new(h))
                .collect(),
            ..Self::default()
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn host_pattern(pattern: impl Into<String>) -> Self {
        Self {
            host_pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
            && self.label.is_none()
            && self.host_pattern.is_none()
            && self.count.is_none()
    }

    /// Whether any host selector (hosts, label or pattern) is set
    #[must_use]
    pub fn has_host_selector(&self) -> bool {
        !self.hosts.is_empty() || self.label.is_some() || self.host_pattern.is_some()
    }

    /// Check selector exclusivity, count and pattern syntax
    ///
    /// # Errors
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), SpecError> {
        let selectors = usize::from(!self.hosts.is_empty())
            + usize::from(self.label.is_some())
            + usize::from(self.host_pattern.is_some());
        if selectors > 1 {
            return Err(SpecError::ConflictingSelectors);
        }
        if self.count == Some(0) {
            return Err(SpecError::ZeroCount);
        }
        if let Some(pattern) = &self.host_pattern {
            glob_check(pattern)?;
        }
        Ok(())
    }
}

fn glob_check(pattern: &str) -> Result<(), SpecError> {
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| SpecError::InvalidHostPattern {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })
}

// ============================================================================
// Service spec
// ============================================================================

/// Declared desired state of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ServiceSpec {
    #[schema(value_type = String)]
    pub service_type: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default)]
    pub placement: PlacementSpec,
    /// Per-service configuration options passed to every daemon
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    /// Unmanaged services are recorded but never reconciled
    #[serde(default)]
    pub unmanaged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_container_args: Vec<String>,
}

impl ServiceSpec {
    pub fn new(service_type: impl Into<ServiceType>) -> Self {
        Self {
            service_type: service_type.into(),
            service_id: None,
            placement: PlacementSpec::default(),
            config: BTreeMap::new(),
            unmanaged: false,
            extra_container_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    #[must_use]
    pub fn with_placement(mut self, placement: PlacementSpec) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn unmanaged(mut self, unmanaged: bool) -> Self {
        self.unmanaged = unmanaged;
        self
    }

    /// `service_type` or `service_type.service_id`
    #[must_use]
    pub fn service_name(&self) -> String {
        match &self.service_id {
            Some(id) => format!("{}.{id}", self.service_type),
            None => self.service_type.to_string(),
        }
    }

    /// Validate the spec and its placement
    ///
    /// # Errors
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.service_type.requires_service_id()
            && self.service_id.as_deref().is_none_or(str::is_empty)
        {
            return Err(SpecError::MissingServiceId(self.service_type.to_string()));
        }
        if self.service_type.forbids_service_id() && self.service_id.is_some() {
            return Err(SpecError::UnexpectedServiceId(
                self.service_type.to_string(),
            ));
        }
        self.placement.validate()
    }
}

/// A client keyring distributed to hosts selected by a placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClientKeyringSpec {
    /// Cluster auth entity, e.g. `client.admin`
    pub entity: String,
    pub placement: PlacementSpec,
    #[serde(default = "default_keyring_mode")]
    pub mode: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
}

fn default_keyring_mode() -> u32 {
    0o600
}

impl ClientKeyringSpec {
    pub fn new(entity: impl Into<String>, placement: PlacementSpec) -> Self {
        Self {
            entity: entity.into(),
            placement,
            mode: default_keyring_mode(),
            uid: 0,
            gid: 0,
        }
    }
}

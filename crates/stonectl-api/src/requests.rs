//! Request types for the API

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::daemon::DaemonAction;
use crate::spec::ServiceSpec;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApplyRequest {
    pub specs: Vec<ServiceSpec>,
    /// Run a reconciliation tick before returning
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddHostRequest {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RemoveHostQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddDaemonRequest {
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RemoveDaemonsRequest {
    pub names: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DaemonActionRequest {
    pub action: DaemonAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ListDaemonsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DescribeServiceQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RemoveOsdsRequest {
    pub ids: Vec<u32>,
    #[serde(default)]
    pub replace: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub zap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopRemoveOsdsRequest {
    pub ids: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EventsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

//! Host management API endpoints

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Serialize;
use serde_json::Value;
use stonectl_api::requests::{AddHostRequest, RemoveHostQuery};
use stonectl_api::responses::MessagesResponse;
use stonectl_api::HostSpec;
use stonectl_core::{
    AddHost, AddHostLabel, EnterMaintenance, ExitMaintenance, GetFacts, ListHosts, RemoveHost,
    RemoveHostLabel,
};
use utoipa::ToSchema;

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

/// Facts gathered from one host
#[derive(Debug, Serialize, ToSchema)]
pub struct FactsResponse {
    pub hostname: String,
    #[schema(value_type = Object)]
    pub facts: BTreeMap<String, Value>,
}

fn message(msg: String) -> Json<MessagesResponse> {
    Json(MessagesResponse { results: vec![msg] })
}

/// List all hosts in the inventory
///
/// # Errors
/// Returns `AppError` if the orchestrator is unavailable
#[utoipa::path(
    get,
    path = "/api/v1/hosts",
    tag = "hosts",
    responses((status = 200, description = "Inventory hosts", body = [HostSpec]))
)]
pub async fn list_hosts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HostSpec>>, AppError> {
    Ok(Json(state.orchestrator.ask(ListHosts).await?))
}

/// Add a host to the inventory
///
/// # Errors
/// Returns `AppError` if the host cannot be registered or stored
#[utoipa::path(
    post,
    path = "/api/v1/hosts",
    tag = "hosts",
    request_body = AddHostRequest,
    responses(
        (status = 201, description = "Host added", body = MessagesResponse),
        (status = 502, description = "Host unreachable", body = ApiError),
    )
)]
pub async fn add_host(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddHostRequest>,
) -> Result<(StatusCode, Json<MessagesResponse>), AppError> {
    let mut spec = HostSpec::new(req.hostname);
    if let Some(addr) = req.addr {
        spec = spec.with_addr(addr);
    }
    spec.labels = req.labels;

    let msg = state.orchestrator.ask(AddHost { spec }).await?;
    Ok((StatusCode::CREATED, message(msg)))
}

/// Remove a host from the inventory
///
/// # Errors
/// Returns `AppError` if the host is unknown or still has daemons
#[utoipa::path(
    delete,
    path = "/api/v1/hosts/{name}",
    tag = "hosts",
    params(
        ("name" = String, Path, description = "Hostname"),
        ("force" = Option<bool>, Query, description = "Remove even with daemons placed"),
    ),
    responses(
        (status = 200, description = "Host removed", body = MessagesResponse),
        (status = 404, description = "Unknown host", body = ApiError),
        (status = 409, description = "Host still in use", body = ApiError),
    )
)]
pub async fn remove_host(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
    Query(query): Query<RemoveHostQuery>,
) -> Result<Json<MessagesResponse>, AppError> {
    let msg = state
        .orchestrator
        .ask(RemoveHost {
            hostname,
            force: query.force,
        })
        .await?;
    Ok(message(msg))
}

/// Add a label to a host
///
/// # Errors
/// Returns `AppError` if the host is unknown
#[utoipa::path(
    post,
    path = "/api/v1/hosts/{name}/labels/{label}",
    tag = "hosts",
    params(
        ("name" = String, Path, description = "Hostname"),
        ("label" = String, Path, description = "Label"),
    ),
    responses((status = 200, description = "Label added", body = MessagesResponse))
)]
pub async fn add_label(
    State(state): State<Arc<AppState>>,
    Path((hostname, label)): Path<(String, String)>,
) -> Result<Json<MessagesResponse>, AppError> {
    let msg = state
        .orchestrator
        .ask(AddHostLabel { hostname, label })
        .await?;
    Ok(message(msg))
}

/// Remove a label from a host
///
/// # Errors
/// Returns `AppError` if the host is unknown or is the last admin host
#[utoipa::path(
    delete,
    path = "/api/v1/hosts/{name}/labels/{label}",
    tag = "hosts",
    params(
        ("name" = String, Path, description = "Hostname"),
        ("label" = String, Path, description = "Label"),
    ),
    responses(
        (status = 200, description = "Label removed", body = MessagesResponse),
        (status = 409, description = "Last admin host", body = ApiError),
    )
)]
pub async fn remove_label(
    State(state): State<Arc<AppState>>,
    Path((hostname, label)): Path<(String, String)>,
) -> Result<Json<MessagesResponse>, AppError> {
    let msg = state
        .orchestrator
        .ask(RemoveHostLabel { hostname, label })
        .await?;
    Ok(message(msg))
}

/// Put a host into maintenance
///
/// # Errors
/// Returns `AppError` if a daemon on the host may not be stopped
#[utoipa::path(
    post,
    path = "/api/v1/hosts/{name}/maintenance",
    tag = "hosts",
    params(
        ("name" = String, Path, description = "Hostname"),
        ("force" = Option<bool>, Query, description = "Skip ok-to-stop checks"),
    ),
    responses(
        (status = 200, description = "Host in maintenance", body = MessagesResponse),
        (status = 409, description = "Stopping refused", body = ApiError),
    )
)]
pub async fn enter_maintenance(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
    Query(query): Query<RemoveHostQuery>,
) -> Result<Json<MessagesResponse>, AppError> {
    let msg = state
        .orchestrator
        .ask(EnterMaintenance {
            hostname,
            force: query.force,
        })
        .await?;
    Ok(message(msg))
}

/// Bring a host out of maintenance
///
/// # Errors
/// Returns `AppError` if the host is unknown or its daemons fail to start
#[utoipa::path(
    delete,
    path = "/api/v1/hosts/{name}/maintenance",
    tag = "hosts",
    params(("name" = String, Path, description = "Hostname")),
    responses((status = 200, description = "Host back in service", body = MessagesResponse))
)]
pub async fn exit_maintenance(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let msg = state
        .orchestrator
        .ask(ExitMaintenance { hostname })
        .await?;
    Ok(message(msg))
}

/// Facts last gathered from a host
///
/// # Errors
/// Returns `AppError` if the host is unknown
#[utoipa::path(
    get,
    path = "/api/v1/hosts/{name}/facts",
    tag = "hosts",
    params(("name" = String, Path, description = "Hostname")),
    responses(
        (status = 200, description = "Host facts", body = FactsResponse),
        (status = 404, description = "Unknown host", body = ApiError),
    )
)]
pub async fn get_facts(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
) -> Result<Json<FactsResponse>, AppError> {
    let facts = state
        .orchestrator
        .ask(GetFacts {
            hostname: hostname.clone(),
        })
        .await?;
    Ok(Json(FactsResponse { hostname, facts }))
}

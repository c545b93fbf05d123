//! Daemon endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use stonectl_api::DaemonDescription;
use stonectl_api::requests::{
    AddDaemonRequest, DaemonActionRequest, ListDaemonsQuery, RemoveDaemonsRequest,
};
use stonectl_api::responses::MessagesResponse;
use stonectl_core::{
    AddDaemon, CancelDaemonAction, ListDaemons, RemoveDaemons, ScheduleDaemonAction,
};

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

/// Cached daemons
///
/// # Errors
/// Returns `AppError` if the orchestrator is unavailable
#[utoipa::path(
    get,
    path = "/api/v1/daemons",
    tag = "daemons",
    params(
        ("host" = Option<String>, Query, description = "Filter by host"),
        ("service_type" = Option<String>, Query, description = "Filter by service type"),
    ),
    responses((status = 200, description = "Daemons", body = [DaemonDescription]))
)]
pub async fn list_daemons(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDaemonsQuery>,
) -> Result<Json<Vec<DaemonDescription>>, AppError> {
    let daemons = state
        .orchestrator
        .ask(ListDaemons {
            host: query.host,
            service_type: query.service_type,
        })
        .await?;
    Ok(Json(daemons))
}

/// Deploy the daemons of an unmanaged spec right away
///
/// # Errors
/// Returns `AppError` if the spec is invalid or a deploy fails
#[utoipa::path(
    post,
    path = "/api/v1/daemons",
    tag = "daemons",
    request_body = AddDaemonRequest,
    responses(
        (status = 200, description = "Daemons deployed", body = MessagesResponse),
        (status = 400, description = "Invalid spec", body = ApiError),
    )
)]
pub async fn add_daemon(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddDaemonRequest>,
) -> Result<Json<MessagesResponse>, AppError> {
    let results = state.orchestrator.ask(AddDaemon { spec: req.spec }).await?;
    Ok(Json(MessagesResponse { results }))
}

/// Remove named daemons right away
///
/// # Errors
/// Returns `AppError` if a daemon is unknown or may not be stopped
#[utoipa::path(
    delete,
    path = "/api/v1/daemons",
    tag = "daemons",
    request_body = RemoveDaemonsRequest,
    responses(
        (status = 200, description = "Daemons removed", body = MessagesResponse),
        (status = 409, description = "Stopping refused", body = ApiError),
    )
)]
pub async fn remove_daemons(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveDaemonsRequest>,
) -> Result<Json<MessagesResponse>, AppError> {
    let results = state
        .orchestrator
        .ask(RemoveDaemons {
            names: req.names,
            force: req.force,
        })
        .await?;
    Ok(Json(MessagesResponse { results }))
}

/// Schedule a lifecycle action for the next tick
///
/// # Errors
/// Returns `AppError` if the daemon is unknown
#[utoipa::path(
    post,
    path = "/api/v1/daemons/{name}/action",
    tag = "daemons",
    params(("name" = String, Path, description = "Daemon name")),
    request_body = DaemonActionRequest,
    responses(
        (status = 202, description = "Action scheduled", body = MessagesResponse),
        (status = 404, description = "Unknown daemon", body = ApiError),
    )
)]
pub async fn schedule_action(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<DaemonActionRequest>,
) -> Result<(StatusCode, Json<MessagesResponse>), AppError> {
    let msg = state
        .orchestrator
        .ask(ScheduleDaemonAction {
            name,
            action: req.action,
        })
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessagesResponse { results: vec![msg] }),
    ))
}

/// Drop a scheduled action that has not run yet
///
/// # Errors
/// Returns `AppError` if the daemon is unknown
#[utoipa::path(
    delete,
    path = "/api/v1/daemons/{name}/action",
    tag = "daemons",
    params(("name" = String, Path, description = "Daemon name")),
    responses((status = 200, description = "Pending action cancelled", body = MessagesResponse))
)]
pub async fn cancel_action(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let cancelled = state
        .orchestrator
        .ask(CancelDaemonAction { name: name.clone() })
        .await?;
    let msg = match cancelled {
        Some(action) => format!("Cancelled {action} of {name}"),
        None => format!("No action scheduled for {name}"),
    };
    Ok(Json(MessagesResponse { results: vec![msg] }))
}

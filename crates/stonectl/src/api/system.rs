//! Liveness, health checks, events and manual reconciliation

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use stonectl_api::requests::EventsQuery;
use stonectl_api::responses::HealthResponse;
use stonectl_api::{HealthCheck, OrchestratorEvent};
use stonectl_core::{GetEvents, GetHealthChecks, GetMigrationStatus, RunTick, TickReport};
use utoipa::{OpenApi, ToSchema};

use crate::api::ApiDoc;
use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

/// Outcome of a manually triggered tick
#[derive(Debug, Serialize, ToSchema)]
pub struct ReconcileResponse {
    pub passes: u32,
    pub deployed: usize,
    pub removed: usize,
    /// Nothing was applied because migrations are pending
    pub paused: bool,
    pub health_checks: usize,
}

impl From<TickReport> for ReconcileResponse {
    fn from(report: TickReport) -> Self {
        Self {
            passes: report.passes,
            deployed: report.deployed,
            removed: report.removed,
            paused: report.paused,
            health_checks: report.health_checks,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub migration_current: u32,
    pub migration_last: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_waiting: Option<String>,
    /// Seconds between background ticks
    pub tick_interval: u64,
    pub started_at: DateTime<Utc>,
}

/// Daemon liveness
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Daemon is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// OpenAPI document
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Orchestrator status
///
/// # Errors
/// Returns `AppError` if the orchestrator is unavailable
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses((status = 200, description = "Orchestrator status", body = StatusResponse))
)]
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let migration = state.orchestrator.ask(GetMigrationStatus).await?;
    Ok(Json(StatusResponse {
        migration_current: migration.current,
        migration_last: migration.last,
        migration_error: migration.error,
        migration_waiting: migration.waiting,
        tick_interval: state.config.orchestrator.tick_interval,
        started_at: state.started_at,
    }))
}

/// Health checks raised by the last tick
///
/// # Errors
/// Returns `AppError` if the orchestrator is unavailable
#[utoipa::path(
    get,
    path = "/api/v1/health-checks",
    tag = "system",
    responses((status = 200, description = "Active health checks", body = [HealthCheck]))
)]
pub async fn health_checks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HealthCheck>>, AppError> {
    Ok(Json(state.orchestrator.ask(GetHealthChecks).await?))
}

/// Recorded events, optionally for one daemon or service
///
/// # Errors
/// Returns `AppError` if the orchestrator is unavailable
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "system",
    params(("subject" = Option<String>, Query, description = "Daemon or service name")),
    responses((status = 200, description = "Events", body = [OrchestratorEvent]))
)]
pub async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<OrchestratorEvent>>, AppError> {
    let events = state
        .orchestrator
        .ask(GetEvents {
            subject: query.subject,
        })
        .await?;
    Ok(Json(events))
}

/// Run one reconciliation tick now
///
/// # Errors
/// Returns `AppError` if the tick fails on a store or migration error
#[utoipa::path(
    post,
    path = "/api/v1/reconcile",
    tag = "system",
    responses(
        (status = 200, description = "Tick finished", body = ReconcileResponse),
        (status = 503, description = "Migration failed", body = ApiError),
    )
)]
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let report = state.orchestrator.ask(RunTick).await?;
    Ok(Json(report.into()))
}

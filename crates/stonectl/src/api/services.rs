//! Service spec endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use stonectl_api::requests::{ApplyRequest, DescribeServiceQuery};
use stonectl_api::responses::{MessagesResponse, ServiceDescription};
use stonectl_core::{Apply, DescribeService, RemoveService};

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

/// Store service specs for reconciliation
///
/// # Errors
/// Returns `AppError` if a spec is invalid or cannot be stored
#[utoipa::path(
    post,
    path = "/api/v1/specs",
    tag = "services",
    request_body = ApplyRequest,
    responses(
        (status = 202, description = "Specs scheduled", body = MessagesResponse),
        (status = 400, description = "Invalid spec", body = ApiError),
    )
)]
pub async fn apply(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<MessagesResponse>), AppError> {
    let results = state
        .orchestrator
        .ask(Apply {
            specs: req.specs,
            immediate: req.immediate,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(MessagesResponse { results })))
}

/// Stored services with their live status
///
/// # Errors
/// Returns `AppError` if the orchestrator is unavailable
#[utoipa::path(
    get,
    path = "/api/v1/services",
    tag = "services",
    params(
        ("service_type" = Option<String>, Query, description = "Filter by service type"),
        ("service_name" = Option<String>, Query, description = "Filter by service name"),
    ),
    responses((status = 200, description = "Services", body = [ServiceDescription]))
)]
pub async fn describe_services(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DescribeServiceQuery>,
) -> Result<Json<Vec<ServiceDescription>>, AppError> {
    let services = state
        .orchestrator
        .ask(DescribeService {
            service_type: query.service_type,
            service_name: query.service_name,
        })
        .await?;
    Ok(Json(services))
}

/// Mark a service deleted; its daemons are drained on the next tick
///
/// # Errors
/// Returns `AppError` if the service is unknown or may not be removed
#[utoipa::path(
    delete,
    path = "/api/v1/services/{name}",
    tag = "services",
    params(("name" = String, Path, description = "Service name")),
    responses(
        (status = 200, description = "Service removed", body = MessagesResponse),
        (status = 404, description = "Unknown service", body = ApiError),
        (status = 409, description = "Service may not be removed", body = ApiError),
    )
)]
pub async fn remove_service(
    State(state): State<Arc<AppState>>,
    Path(service_name): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let msg = state
        .orchestrator
        .ask(RemoveService { service_name })
        .await?;
    Ok(Json(MessagesResponse { results: vec![msg] }))
}

//! OSD removal queue endpoints

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use stonectl_api::OsdRemoval;
use stonectl_api::requests::{RemoveOsdsRequest, StopRemoveOsdsRequest};
use stonectl_api::responses::MessagesResponse;
use stonectl_core::{GetOsdRemovalStatus, RemoveOsds, StopRemoveOsds};

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

/// OSDs queued for removal
///
/// # Errors
/// Returns `AppError` if the orchestrator is unavailable
#[utoipa::path(
    get,
    path = "/api/v1/osds/removal",
    tag = "osds",
    responses((status = 200, description = "Removal queue", body = [OsdRemoval]))
)]
pub async fn removal_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OsdRemoval>>, AppError> {
    Ok(Json(state.orchestrator.ask(GetOsdRemovalStatus).await?))
}

/// Queue OSDs for drain-then-destroy removal
///
/// # Errors
/// Returns `AppError` if an OSD is unknown
#[utoipa::path(
    post,
    path = "/api/v1/osds/removal",
    tag = "osds",
    request_body = RemoveOsdsRequest,
    responses(
        (status = 202, description = "OSDs queued", body = MessagesResponse),
        (status = 404, description = "Unknown OSD", body = ApiError),
    )
)]
pub async fn remove_osds(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveOsdsRequest>,
) -> Result<(StatusCode, Json<MessagesResponse>), AppError> {
    let results = state
        .orchestrator
        .ask(RemoveOsds {
            ids: req.ids,
            replace: req.replace,
            force: req.force,
            zap: req.zap,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(MessagesResponse { results })))
}

/// Take OSDs out of the removal queue and mark them back in
///
/// # Errors
/// Returns `AppError` if the cluster rejects the command
#[utoipa::path(
    delete,
    path = "/api/v1/osds/removal",
    tag = "osds",
    request_body = StopRemoveOsdsRequest,
    responses(
        (status = 200, description = "Removal stopped", body = MessagesResponse),
        (status = 502, description = "Cluster command failed", body = ApiError),
    )
)]
pub async fn stop_removal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StopRemoveOsdsRequest>,
) -> Result<Json<MessagesResponse>, AppError> {
    let results = state
        .orchestrator
        .ask(StopRemoveOsds { ids: req.ids })
        .await?;
    Ok(Json(MessagesResponse { results }))
}

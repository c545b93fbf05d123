//! API error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kameo::error::{Infallible, SendError};
use serde::{Deserialize, Serialize};
use stonectl_core::CoreError;
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
}

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Wrapper for API errors with status codes
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: ApiError,
}

impl AppError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: ApiError::new("ORCHESTRATOR_UNAVAILABLE", message),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let (status, code) = match &err {
            CoreError::HostNotFound(_) => (StatusCode::NOT_FOUND, "HOST_NOT_FOUND"),
            CoreError::ServiceNotFound(_) => (StatusCode::NOT_FOUND, "SERVICE_NOT_FOUND"),
            CoreError::DaemonNotFound(_) => (StatusCode::NOT_FOUND, "DAEMON_NOT_FOUND"),
            CoreError::InvalidSpec(_) | CoreError::UnsupportedService(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_SPEC")
            }
            CoreError::Placement(_) => (StatusCode::BAD_REQUEST, "PLACEMENT_FAILED"),
            CoreError::Refused(_) => (StatusCode::CONFLICT, "REFUSED"),
            CoreError::Exec(_) | CoreError::Cluster { .. } | CoreError::Probe { .. } => {
                (StatusCode::BAD_GATEWAY, "REMOTE_FAILURE")
            }
            CoreError::Migration { .. } => (StatusCode::SERVICE_UNAVAILABLE, "MIGRATION_PENDING"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        Self {
            status,
            error: ApiError::new(code, err.to_string()),
        }
    }
}

impl<M> From<SendError<M, CoreError>> for AppError {
    fn from(err: SendError<M, CoreError>) -> Self {
        match err {
            SendError::HandlerError(e) => e.into(),
            _ => Self::unavailable("orchestrator is not running"),
        }
    }
}

impl<M> From<SendError<M, Infallible>> for AppError {
    fn from(_: SendError<M, Infallible>) -> Self {
        Self::unavailable("orchestrator is not running")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_status() {
        let cases = [
            (CoreError::HostNotFound("h".into()), StatusCode::NOT_FOUND),
            (CoreError::Refused("no".into()), StatusCode::CONFLICT),
            (
                CoreError::UnsupportedService("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoreError::Migration {
                    from: 1,
                    to: 2,
                    reason: "bad".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::Store(stonectl_core::StoreError::Io("disk full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_refusal_keeps_message() {
        let err = AppError::from(CoreError::Refused(
            "Unable to remove mon service".to_string(),
        ));
        assert_eq!(err.error.code, "REFUSED");
        assert_eq!(err.error.message, "Unable to remove mon service");
    }

    #[test]
    fn test_stopped_actor_is_unavailable() {
        let err = AppError::from(SendError::<(), CoreError>::ActorStopped);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}

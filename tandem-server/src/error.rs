//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tandem_sync::SyncError;
use thiserror::Error;
use tracing::error;

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    /// Whether the same request may succeed if sent again later.
    pub retryable: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or empty x-user-id header")]
    MissingUser,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::MissingUser => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Sync(err) => sync_parts(err),
        }
    }
}

fn sync_parts(err: &SyncError) -> (StatusCode, &'static str) {
    match err {
        SyncError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        SyncError::ScheduleConfigInvalid(_) => (StatusCode::BAD_REQUEST, "schedule_config_invalid"),
        SyncError::ServiceNotConnected { .. } => (StatusCode::CONFLICT, "service_not_connected"),
        SyncError::InvalidCredentials { .. } => (StatusCode::CONFLICT, "invalid_credentials"),
        SyncError::ServiceUnavailable(_) => (StatusCode::NOT_FOUND, "service_unavailable"),
        SyncError::ScheduleNotFound(_) => (StatusCode::NOT_FOUND, "schedule_not_found"),
        SyncError::JobNotFound(_) => (StatusCode::NOT_FOUND, "job_not_found"),
        SyncError::JobNotCancellable { .. } => (StatusCode::CONFLICT, "job_not_cancellable"),
        SyncError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
        SyncError::QueueClosed => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
        SyncError::Provider(e) if e.is_auth() => (StatusCode::BAD_REQUEST, "authorization_failed"),
        SyncError::Provider(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.parts();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let retryable = matches!(&self, Self::Sync(e) if e.is_retryable());

        let body = ErrorBody {
            error: kind.to_string(),
            message,
            retryable,
        };
        (status, Json(body)).into_response()
    }
}

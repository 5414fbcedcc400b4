//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cdedb_backend::BackendError;
use cdedb_store::StoreError;
use serde::Serialize;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - concurrent change, retry may succeed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is not allowed in the current state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Partial import token no longer matches the event data.
    #[error("partial import conflict")]
    PartialImportConflict {
        /// Token sent by the client.
        expected: String,
        /// Token of the current data.
        actual: String,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::Precondition(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "precondition_failed",
                msg.clone(),
                None,
            ),
            Self::PartialImportConflict { expected, actual } => (
                StatusCode::CONFLICT,
                "partial_import_conflict",
                "Event data changed since the dry run".to_string(),
                Some(serde_json::json!({
                    "expected": expected,
                    "actual": actual
                })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("record not found".into()),
            StoreError::Conflict => Self::Conflict(err.to_string()),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound { .. } => Self::NotFound(err.to_string()),
            BackendError::Validation(msg) => Self::BadRequest(msg),
            BackendError::Precondition(_) | BackendError::AlreadyTallied { .. } => {
                Self::Precondition(err.to_string())
            }
            BackendError::PartialImportConflict { expected, actual } => {
                Self::PartialImportConflict { expected, actual }
            }
            BackendError::Store(store) => store.into(),
        }
    }
}

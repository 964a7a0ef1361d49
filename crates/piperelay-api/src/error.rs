//! API error type with JSON error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use piperelay_core::CoreError;
use serde::Serialize;
use tracing::error;

/// JSON body returned for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable error description.
    pub error: String,
}

/// Errors surfaced by API handlers, mapped onto HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    /// Request was malformed or failed validation (400).
    BadRequest(String),
    /// Missing or invalid bearer token (401).
    Unauthorized(String),
    /// Entity does not exist (404).
    NotFound(String),
    /// Backend failure (500). Details are logged, not returned.
    Internal(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(message) => Self::BadRequest(message),
            CoreError::PayloadTooLarge { .. } => Self::BadRequest(err.to_string()),
            CoreError::NotFound(message) => Self::NotFound(message),
            CoreError::Conflict(message) => Self::BadRequest(message),
            CoreError::Database(message) => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => {
                error!(error = %message, "internal error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            },
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

//! HTTP error mapping
//!
//! Not-found style store errors become 404 with their message; everything
//! else is logged and answered with a generic 500.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown track, stem, artifact kind or missing file (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Range header outside the file (416)
    #[error("Range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    /// Internal server error (500); details are only logged
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Map a store error for `operation` on `track`, logging the cause
    pub fn from_store(operation: &'static str, track: &str, err: mdx_common::Error) -> Self {
        use mdx_common::Error;

        match err {
            e if e.is_not_found() => {
                tracing::debug!(operation, track, error = %e, "Not found");
                ApiError::NotFound(e.to_string())
            }
            Error::RangeNotSatisfiable { size } => {
                tracing::debug!(operation, track, size, "Range not satisfiable");
                ApiError::RangeNotSatisfiable { size }
            }
            e => {
                tracing::error!(operation, track, error = %e, "Request failed");
                ApiError::Internal
            }
        }
    }

    /// Blocking task died before producing a result
    pub fn join(operation: &'static str, track: &str, err: tokio::task::JoinError) -> Self {
        tracing::error!(operation, track, error = %err, "Blocking task failed");
        ApiError::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::RangeNotSatisfiable { .. } => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                "RANGE_NOT_SATISFIABLE",
                self.to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        match self {
            ApiError::RangeNotSatisfiable { size } => (
                status,
                [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

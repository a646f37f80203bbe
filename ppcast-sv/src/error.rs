//! Error types for ppcast-sv
//!
//! Failures before the first body byte become a status code here.
//! Failures after that point can only truncate the body (see
//! [`crate::stream::StreamError`]).

use crate::catalog::CatalogError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown playlist (404)
    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    /// Catalog could not be reached or answered badly (502)
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Range cannot be served (416, empty body)
    #[error("Range not satisfiable (total size {total_size})")]
    RangeNotSatisfiable { total_size: u64 },

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(msg) => ApiError::PlaylistNotFound(msg),
            other => ApiError::UpstreamUnreachable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::RangeNotSatisfiable { total_size } => {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", total_size))],
                )
                    .into_response();
            }
            ApiError::PlaylistNotFound(msg) => (StatusCode::NOT_FOUND, "PLAYLIST_NOT_FOUND", msg),
            ApiError::UpstreamUnreachable(msg) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_UNREACHABLE", msg)
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

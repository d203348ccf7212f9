//! Mapping of resolution errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nzbstream_core::{CacheError, ResolveError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.to_string(),
            },
        }
    }
}

/// HTTP status for a resolution outcome.
pub fn status_for(error: &ResolveError) -> StatusCode {
    match error {
        ResolveError::NoCandidates => StatusCode::NOT_FOUND,
        ResolveError::NegativeCached { .. } => StatusCode::GONE,
        ResolveError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ResolveError::BackendFailure { .. }
        | ResolveError::NoPlayableMedia { .. }
        | ResolveError::Exhausted { .. }
        | ResolveError::Transport(_)
        | ResolveError::Auth(_)
        | ResolveError::Search(_) => StatusCode::BAD_GATEWAY,
        ResolveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        Self::new(status_for(&e), e.code(), e.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "cache", e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

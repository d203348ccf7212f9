//! Cache tier API handlers.

use std::sync::Arc;

use axum::{extract::State, Json};
use nzbstream_core::CacheStats;
use serde::Serialize;
use tracing::info;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

/// GET /api/v1/cache/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<CacheStats>, ApiError> {
    Ok(Json(state.caches().stats()?))
}

/// DELETE /api/v1/cache
///
/// Drops resolution, negative and instant entries. Jobs in flight stay
/// tracked.
pub async fn clear(State(state): State<Arc<AppState>>) -> Result<Json<SuccessResponse>, ApiError> {
    state.caches().clear()?;
    info!("Cache tiers cleared");
    Ok(Json(SuccessResponse {
        message: "Cache cleared".to_string(),
    }))
}

//! Resolution API handlers.

use std::sync::Arc;

use axum::{extract::State, Json};
use nzbstream_core::{PlaybackFailure, PlaybackRequest, StreamRef};
use serde::Deserialize;
use tracing::{info, warn};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FallbackRequest {
    /// Stream reference previously returned by `/resolve`.
    pub stream: StreamRef,
    pub failure: PlaybackFailure,
}

/// POST /api/v1/resolve
///
/// Resolve a playback request to a playable stream. Blocks until the
/// download backend has media or every candidate failed.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlaybackRequest>,
) -> Result<Json<StreamRef>, ApiError> {
    match state.resolver().resolve(&request).await {
        Ok(stream) => {
            info!(
                content = %request.content.storage_key(),
                download_ref = %stream.download_ref,
                source = ?stream.source,
                "Resolved stream"
            );
            Ok(Json(stream))
        }
        Err(e) => {
            warn!(content = %request.content.storage_key(), error = %e, "Resolution failed");
            Err(e.into())
        }
    }
}

/// POST /api/v1/resolve/fallback
///
/// Report a terminal playback failure and move on to the next backup.
pub async fn fallback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FallbackRequest>,
) -> Result<Json<StreamRef>, ApiError> {
    warn!(
        download_ref = %body.stream.download_ref,
        failure = body.failure.code(),
        "Playback failure reported"
    );
    let next = state.resolver().advance(&body.stream, body.failure).await?;
    Ok(Json(next))
}

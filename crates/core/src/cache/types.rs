//! Types shared by the cache tiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{BackendError, PlayableMedia};

/// Season and episode of a TV request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeNumber {
    pub season: u32,
    pub episode: u32,
}

impl std::fmt::Display for EpisodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{:02}E{:02}", self.season, self.episode)
    }
}

/// Resolution cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub download_ref: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeNumber>,
}

impl CacheKey {
    pub fn new(
        download_ref: impl Into<String>,
        category: impl Into<String>,
        episode: Option<EpisodeNumber>,
    ) -> Self {
        Self {
            download_ref: download_ref.into(),
            category: category.into(),
            episode,
        }
    }
}

/// A finished resolution: the job that holds the content and its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub download_ref: String,
    pub job_id: String,
    pub media: PlayableMedia,
}

/// Observable state of a resolution entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Ready,
    Failed,
    TimeoutPending,
}

/// Why a resolution did not produce a stream.
///
/// Clone because every caller sharing a single-flight attempt receives it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Download failed: {message}")]
    BackendFailure {
        job_id: Option<String>,
        message: String,
    },

    #[error("No playable media in job {job_id}")]
    NoPlayableMedia { job_id: String },

    #[error("Known bad resource {download_ref}: {reason}")]
    NegativeCached {
        download_ref: String,
        reason: String,
        code: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Credentials rejected: {0}")]
    Auth(String),

    #[error("All candidates failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: String },

    #[error("No candidates available")]
    NoCandidates,

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    /// Explicit failure of this resource; the fallback chain moves on.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolveError::BackendFailure { .. }
                | ResolveError::NoPlayableMedia { .. }
                | ResolveError::NegativeCached { .. }
        )
    }

    /// Ambiguous outcome; the job may still finish.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResolveError::Timeout(_) | ResolveError::Transport(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ResolveError::Auth(_))
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::BackendFailure { .. } => "backend_failure",
            ResolveError::NoPlayableMedia { .. } => "no_playable_media",
            ResolveError::NegativeCached { .. } => "negative_cached",
            ResolveError::Timeout(_) => "timeout",
            ResolveError::Transport(_) => "transport",
            ResolveError::Auth(_) => "auth",
            ResolveError::Exhausted { .. } => "exhausted",
            ResolveError::NoCandidates => "no_candidates",
            ResolveError::Search(_) => "search",
            ResolveError::Internal(_) => "internal",
        }
    }
}

impl From<BackendError> for ResolveError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Timeout => ResolveError::Timeout("download backend".to_string()),
            BackendError::ConnectionFailed(msg) | BackendError::ApiError(msg) => {
                ResolveError::Transport(msg)
            }
            BackendError::AuthenticationFailed(msg) => ResolveError::Auth(msg),
            BackendError::Internal(msg) => ResolveError::Internal(msg),
        }
    }
}

/// Errors from the persistent cache tier.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Entry counts across the cache tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
    pub timeout_pending: usize,
    pub negative: usize,
    pub instant: usize,
    pub in_flight: usize,
}

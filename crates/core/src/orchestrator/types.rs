//! Request and stream-reference types of the resolution pipeline.

use serde::{Deserialize, Serialize};

use crate::backend::PlayableMedia;
use crate::cache::{CacheKey, ContentKey, ContentKind, EpisodeNumber, ResolvedStream};

/// Maximum backups carried by a stream reference.
pub const MAX_BACKUPS: usize = 2;

/// A playback request with its metadata already resolved to a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackRequest {
    pub content: ContentKey,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
}

impl PlaybackRequest {
    pub fn movie(id: impl Into<String>, title: impl Into<String>, year: Option<u16>) -> Self {
        Self {
            content: ContentKey::movie(id),
            title: title.into(),
            year,
        }
    }

    pub fn episode(
        id: impl Into<String>,
        title: impl Into<String>,
        season: u32,
        episode: u32,
    ) -> Self {
        Self {
            content: ContentKey::episode(id, season, episode),
            title: title.into(),
            year: None,
        }
    }

    pub fn is_series(&self) -> bool {
        self.content.kind == ContentKind::Series
    }

    pub fn episode_number(&self) -> Option<EpisodeNumber> {
        self.content.episode
    }

    /// Search strings for this request.
    pub fn queries(&self) -> Vec<String> {
        match (self.episode_number(), self.year) {
            (Some(ep), _) => vec![
                format!("{} {}", self.title, ep),
                format!("{} S{:02}", self.title, ep.season),
            ],
            (None, Some(year)) => vec![format!("{} {}", self.title, year), self.title.clone()],
            (None, None) => vec![self.title.clone()],
        }
    }
}

/// Where a stream reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSource {
    /// Durable instant cache hit.
    Instant,
    /// Already-completed job found in download history.
    History,
    /// Job created (or joined) for this request.
    Download,
}

/// A candidate kept in reserve for the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCandidate {
    pub download_ref: String,
    pub title: String,
}

/// A ready-to-stream resource plus up to [`MAX_BACKUPS`] backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRef {
    pub content: ContentKey,
    pub category: String,
    pub download_ref: String,
    pub job_id: String,
    pub release_name: String,
    pub media: PlayableMedia,
    pub source: StreamSource,
    #[serde(default)]
    pub backups: Vec<BackupCandidate>,
    /// Resolution attempts spent on this request so far.
    #[serde(default)]
    pub attempts: usize,
}

impl StreamRef {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.download_ref, &self.category, self.content.episode)
    }

    pub(crate) fn from_resolved(
        content: ContentKey,
        category: &str,
        release_name: &str,
        resolved: ResolvedStream,
        source: StreamSource,
    ) -> Self {
        Self {
            content,
            category: category.to_string(),
            download_ref: resolved.download_ref,
            job_id: resolved.job_id,
            release_name: release_name.to_string(),
            media: resolved.media,
            source,
            backups: Vec::new(),
            attempts: 0,
        }
    }
}

/// Terminal playback failure reported for a stream reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackFailure {
    /// The backend reported the job failed.
    BackendFailure,
    /// The job completed without a playable file.
    NoPlayableMedia,
}

impl PlaybackFailure {
    pub fn code(&self) -> &'static str {
        match self {
            PlaybackFailure::BackendFailure => "backend_failure",
            PlaybackFailure::NoPlayableMedia => "no_playable_media",
        }
    }
}

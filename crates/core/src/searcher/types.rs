//! Types for the release search system.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blocklist::BlockVerdict;
use crate::triage::TriageStatus;

/// Priority assigned to hits from indexers without a configured priority.
/// Lower values win.
pub const DEFAULT_INDEXER_PRIORITY: u32 = 25;

/// Query parameters for a release search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text search query.
    pub query: String,
    /// Content category to search in.
    pub category: SearchCategory,
    /// Maximum results to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, category: SearchCategory) -> Self {
        Self {
            query: query.into(),
            category,
            limit: None,
        }
    }
}

/// Content category for filtering search results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SearchCategory {
    Movies,
    Tv,
}

/// Raw hit from a single indexer (before aggregation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub title: String,
    /// Opaque reference the download backend accepts (usually an NZB URL).
    pub download_ref: String,
    pub indexer_id: u32,
    pub indexer_name: String,
    pub size_bytes: u64,
    /// Source priority, lower wins on dedup collisions.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    DEFAULT_INDEXER_PRIORITY
}

/// A deduplicated release candidate for one playback request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub download_ref: String,
    pub indexer_id: u32,
    pub indexer_name: String,
    pub size_bytes: u64,
    /// Languages parsed from the title.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Set when the title matched a blocklist rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockVerdict>,
    /// Verification status, filled in by triage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TriageStatus>,
}

impl Candidate {
    pub fn is_blocked(&self) -> bool {
        self.blocked.as_ref().is_some_and(|v| v.blocked)
    }

    pub fn has_language(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }
}

/// Errors that can occur during search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search backend connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Search backend API error: {0}")]
    ApiError(String),

    #[error("Search backend rejected credentials")]
    Unauthorized,

    #[error("All queries failed: {0}")]
    AllQueriesFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for indexer manager backends.
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Execute a search across the indexers the manager knows about.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawHit>, SearchError>;
}

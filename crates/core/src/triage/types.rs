//! Types for availability triage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of triaging one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    /// Every sampled article is present.
    Verified,
    /// Probe was inconclusive; not a rejection.
    Unverified,
    /// Content sits inside archives that cannot be sampled directly.
    UnverifiedArchived,
    /// Title matched a blocklist rule; never probed.
    Blocked,
    /// Fetch, parse or probe failure, or missing articles.
    Error,
}

impl TriageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriageStatus::Verified => "verified",
            TriageStatus::Unverified => "unverified",
            TriageStatus::UnverifiedArchived => "unverified_archived",
            TriageStatus::Blocked => "blocked",
            TriageStatus::Error => "error",
        }
    }

    /// Usable as a degraded fallback when nothing verified.
    pub fn is_unverified(&self) -> bool {
        matches!(self, TriageStatus::Unverified | TriageStatus::UnverifiedArchived)
    }
}

/// Classification of one candidate in one triage pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageDecision {
    pub download_ref: String,
    pub title: String,
    pub status: TriageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Blocklist pattern, for blocked decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub sampled: usize,
    #[serde(default)]
    pub missing: usize,
}

impl TriageDecision {
    pub(crate) fn new(download_ref: &str, title: &str, status: TriageStatus) -> Self {
        Self {
            download_ref: download_ref.to_string(),
            title: title.to_string(),
            status,
            reason: None,
            pattern: None,
            sampled: 0,
            missing: 0,
        }
    }

    pub(crate) fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Availability of a single article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Present,
    Missing,
    /// Transient failure checking this article.
    Error,
}

/// Errors from a Usenet provider.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("Provider rejected credentials: {0}")]
    AuthRejected(String),

    #[error("Provider connection failed: {0}")]
    Connection(String),

    #[error("Provider protocol error: {0}")]
    Protocol(String),

    #[error("Probe timeout")]
    Timeout,
}

/// Errors fetching or reading an NZB document.
#[derive(Debug, Clone, Error)]
pub enum TriageError {
    #[error("NZB fetch failed: {0}")]
    Fetch(String),

    #[error("NZB source rejected credentials: {0}")]
    Auth(String),

    #[error("NZB parse failed: {0}")]
    Parse(String),
}

/// Checks article presence on a Usenet provider.
#[async_trait]
pub trait UsenetProvider: Send + Sync {
    /// One status per message id, in input order.
    async fn probe(&self, message_ids: &[String]) -> Result<Vec<ArticleStatus>, ProbeError>;
}

/// Fetches the NZB document behind a download reference.
#[async_trait]
pub trait NzbSource: Send + Sync {
    async fn fetch(&self, download_ref: &str) -> Result<String, TriageError>;
}

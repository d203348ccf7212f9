//! Types for download backend operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during download backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_connect() {
            BackendError::ConnectionFailed(e.to_string())
        } else {
            BackendError::ApiError(e.to_string())
        }
    }
}

/// Lifecycle state of a backend job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Extracting,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map a SABnzbd-style status string.
    pub fn from_backend(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "extracting" | "verifying" | "repairing" | "moving" | "running" | "quickcheck" => {
                JobStatus::Extracting
            }
            "downloading" | "fetching" | "grabbing" => JobStatus::Downloading,
            _ => JobStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Extracting => "extracting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// A job owned by the download backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub job_id: String,
    /// Release name as the backend knows it.
    pub name: String,
    pub category: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_message: Option<String>,
    /// Backend-side storage location of a completed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

/// A streamable file inside a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayableMedia {
    pub job_id: String,
    /// Path within the backend's listing.
    pub path: String,
    /// Remote URL the player fetches.
    pub url: String,
    pub size_bytes: u64,
}

/// Trait for download backends.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Submit a download reference, returning the backend job id.
    async fn enqueue(&self, download_ref: &str, category: &str) -> Result<String, BackendError>;

    /// Active (not yet finished) jobs.
    async fn queue(&self, limit: usize) -> Result<Vec<DownloadJob>, BackendError>;

    /// Finished jobs, most recent first.
    async fn history(&self, limit: usize) -> Result<Vec<DownloadJob>, BackendError>;

    /// Locate the playable file of a completed job. `None` when the job holds
    /// no media.
    async fn resolve_playable(
        &self,
        job: &DownloadJob,
    ) -> Result<Option<PlayableMedia>, BackendError>;

    /// Look a job up in the queue, then in history.
    async fn find_job(&self, job_id: &str, limit: usize) -> Result<Option<DownloadJob>, BackendError> {
        if let Some(job) = self.queue(limit).await?.into_iter().find(|j| j.job_id == job_id) {
            return Ok(Some(job));
        }
        Ok(self
            .history(limit)
            .await?
            .into_iter()
            .find(|j| j.job_id == job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(JobStatus::from_backend("Completed"), JobStatus::Completed);
        assert_eq!(JobStatus::from_backend("Failed"), JobStatus::Failed);
        assert_eq!(JobStatus::from_backend("Verifying"), JobStatus::Extracting);
        assert_eq!(JobStatus::from_backend("Downloading"), JobStatus::Downloading);
        assert_eq!(JobStatus::from_backend("Paused"), JobStatus::Queued);
        assert_eq!(JobStatus::from_backend("Queued"), JobStatus::Queued);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Extracting).unwrap(),
            "\"extracting\""
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
    }
}

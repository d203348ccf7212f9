//! Mock download backend for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::backend::{BackendError, DownloadBackend, DownloadJob, JobStatus, PlayableMedia};

/// What happens to a job right after it is enqueued.
#[derive(Debug, Clone)]
enum OnEnqueue {
    /// Completes immediately; `None` means the job holds no media.
    Complete(Option<String>),
    /// Fails immediately with a backend message.
    Fail(String),
    /// Stays queued until the test finishes or fails it.
    Hold,
}

#[derive(Debug, Clone)]
struct MockJob {
    job: DownloadJob,
    file: Option<String>,
    /// Enqueue order, used to list history most recent first.
    seq: usize,
}

#[derive(Debug, Default)]
struct State {
    behaviors: HashMap<String, OnEnqueue>,
    jobs: HashMap<String, MockJob>,
    enqueued: Vec<(String, String)>,
    auth_failure: bool,
    enqueue_delay: Option<Duration>,
}

/// Mock implementation of the DownloadBackend trait.
///
/// Unconfigured references complete immediately with `<ref>.mkv`. Media
/// lives at `/<category>/<file>` under `http://backend.test`.
#[derive(Debug, Default)]
pub struct MockDownloadBackend {
    state: Arc<RwLock<State>>,
}

impl MockDownloadBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn complete_on_enqueue(&self, download_ref: &str, file: Option<&str>) {
        self.set_behavior(download_ref, OnEnqueue::Complete(file.map(String::from)))
            .await;
    }

    pub async fn fail_on_enqueue(&self, download_ref: &str, message: &str) {
        self.set_behavior(download_ref, OnEnqueue::Fail(message.to_string()))
            .await;
    }

    pub async fn hold_on_enqueue(&self, download_ref: &str) {
        self.set_behavior(download_ref, OnEnqueue::Hold).await;
    }

    async fn set_behavior(&self, download_ref: &str, behavior: OnEnqueue) {
        self.state
            .write()
            .await
            .behaviors
            .insert(download_ref.to_string(), behavior);
    }

    /// Complete a held job.
    pub async fn finish_job(&self, job_id: &str, file: Option<&str>) {
        if let Some(job) = self.state.write().await.jobs.get_mut(job_id) {
            job.job.status = JobStatus::Completed;
            job.file = file.map(String::from);
        }
    }

    /// Fail a held job.
    pub async fn fail_job(&self, job_id: &str, message: &str) {
        if let Some(job) = self.state.write().await.jobs.get_mut(job_id) {
            job.job.status = JobStatus::Failed;
            job.job.fail_message = Some(message.to_string());
        }
    }

    /// Add an already-completed job to history.
    pub async fn add_history_job(&self, job_id: &str, name: &str, category: &str, file: Option<&str>) {
        let mut state = self.state.write().await;
        let seq = state.jobs.len();
        state.jobs.insert(
            job_id.to_string(),
            MockJob {
                job: DownloadJob {
                    job_id: job_id.to_string(),
                    name: name.to_string(),
                    category: category.to_string(),
                    status: JobStatus::Completed,
                    fail_message: None,
                    storage: None,
                },
                file: file.map(String::from),
                seq,
            },
        );
    }

    pub async fn set_auth_failure(&self, failing: bool) {
        self.state.write().await.auth_failure = failing;
    }

    /// Delay every enqueue call.
    pub async fn set_enqueue_delay(&self, delay: Duration) {
        self.state.write().await.enqueue_delay = Some(delay);
    }

    pub async fn enqueue_count(&self) -> usize {
        self.state.read().await.enqueued.len()
    }

    /// Job ids created by enqueue, in order.
    pub async fn enqueued_jobs(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .enqueued
            .iter()
            .map(|(_, job)| job.clone())
            .collect()
    }

    /// References submitted, in order.
    pub async fn enqueued_refs(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .enqueued
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    async fn check_auth(&self) -> Result<(), BackendError> {
        if self.state.read().await.auth_failure {
            return Err(BackendError::AuthenticationFailed("API Key Incorrect".to_string()));
        }
        Ok(())
    }

    async fn jobs_where(&self, limit: usize, finished: bool) -> Vec<DownloadJob> {
        let state = self.state.read().await;
        let mut jobs: Vec<&MockJob> = state
            .jobs
            .values()
            .filter(|j| j.job.status.is_terminal() == finished)
            .collect();
        jobs.sort_by(|a, b| b.seq.cmp(&a.seq));
        jobs.into_iter().take(limit).map(|j| j.job.clone()).collect()
    }
}

#[async_trait]
impl DownloadBackend for MockDownloadBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn enqueue(&self, download_ref: &str, category: &str) -> Result<String, BackendError> {
        self.check_auth().await?;
        let delay = self.state.read().await.enqueue_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        let seq = state.jobs.len();
        let job_id = format!("SABnzbd_nzo_{}", seq + 1);
        let behavior = state
            .behaviors
            .get(download_ref)
            .cloned()
            .unwrap_or_else(|| OnEnqueue::Complete(Some(format!("{}.mkv", download_ref))));

        let (status, fail_message, file) = match behavior {
            OnEnqueue::Complete(file) => (JobStatus::Completed, None, file),
            OnEnqueue::Fail(message) => (JobStatus::Failed, Some(message), None),
            OnEnqueue::Hold => (JobStatus::Queued, None, None),
        };
        state.jobs.insert(
            job_id.clone(),
            MockJob {
                job: DownloadJob {
                    job_id: job_id.clone(),
                    name: download_ref.to_string(),
                    category: category.to_string(),
                    status,
                    fail_message,
                    storage: None,
                },
                file,
                seq,
            },
        );
        state
            .enqueued
            .push((download_ref.to_string(), job_id.clone()));
        Ok(job_id)
    }

    async fn queue(&self, limit: usize) -> Result<Vec<DownloadJob>, BackendError> {
        self.check_auth().await?;
        Ok(self.jobs_where(limit, false).await)
    }

    async fn history(&self, limit: usize) -> Result<Vec<DownloadJob>, BackendError> {
        self.check_auth().await?;
        Ok(self.jobs_where(limit, true).await)
    }

    async fn resolve_playable(
        &self,
        job: &DownloadJob,
    ) -> Result<Option<PlayableMedia>, BackendError> {
        self.check_auth().await?;
        let state = self.state.read().await;
        let Some(file) = state.jobs.get(&job.job_id).and_then(|j| j.file.clone()) else {
            return Ok(None);
        };
        let path = format!("/{}/{}", job.category, file);
        Ok(Some(PlayableMedia {
            job_id: job.job_id.clone(),
            url: format!("http://backend.test{}", path),
            path,
            size_bytes: 1_000_000,
        }))
    }
}

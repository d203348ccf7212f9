//! Mock Usenet provider and NZB source for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::triage::{ArticleStatus, NzbSource, ProbeError, TriageError, UsenetProvider};

/// Mock implementation of the UsenetProvider trait.
///
/// Message ids marked present answer [`ArticleStatus::Present`], transient
/// ones [`ArticleStatus::Error`], anything else [`ArticleStatus::Missing`].
#[derive(Debug, Default)]
pub struct MockUsenetProvider {
    present: Arc<RwLock<HashSet<String>>>,
    transient: Arc<RwLock<HashSet<String>>>,
    failure: Arc<RwLock<Option<ProbeError>>>,
    calls: Arc<RwLock<Vec<Vec<String>>>>,
}

impl MockUsenetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_present(&self, ids: &[&str]) {
        self.present
            .write()
            .await
            .extend(ids.iter().map(|id| id.to_string()));
    }

    pub async fn set_transient(&self, ids: &[&str]) {
        self.transient
            .write()
            .await
            .extend(ids.iter().map(|id| id.to_string()));
    }

    /// Fail every probe with `error` while set.
    pub async fn set_failure(&self, error: Option<ProbeError>) {
        *self.failure.write().await = error;
    }

    /// Message ids of each probe call, in order.
    pub async fn probe_calls(&self) -> Vec<Vec<String>> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl UsenetProvider for MockUsenetProvider {
    async fn probe(&self, message_ids: &[String]) -> Result<Vec<ArticleStatus>, ProbeError> {
        self.calls.write().await.push(message_ids.to_vec());

        if let Some(error) = self.failure.read().await.clone() {
            return Err(error);
        }

        let present = self.present.read().await;
        let transient = self.transient.read().await;
        Ok(message_ids
            .iter()
            .map(|id| {
                if present.contains(id) {
                    ArticleStatus::Present
                } else if transient.contains(id) {
                    ArticleStatus::Error
                } else {
                    ArticleStatus::Missing
                }
            })
            .collect())
    }
}

/// Mock implementation of the NzbSource trait. Unknown references fail
/// with [`TriageError::Fetch`].
#[derive(Debug, Default)]
pub struct MockNzbSource {
    documents: Arc<RwLock<HashMap<String, String>>>,
    fetches: Arc<RwLock<usize>>,
}

impl MockNzbSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_nzb(&self, download_ref: &str, xml: String) {
        self.documents
            .write()
            .await
            .insert(download_ref.to_string(), xml);
    }

    pub async fn fetch_count(&self) -> usize {
        *self.fetches.read().await
    }
}

#[async_trait]
impl NzbSource for MockNzbSource {
    async fn fetch(&self, download_ref: &str) -> Result<String, TriageError> {
        *self.fetches.write().await += 1;
        self.documents
            .read()
            .await
            .get(download_ref)
            .cloned()
            .ok_or_else(|| TriageError::Fetch(format!("404 for {}", download_ref)))
    }
}

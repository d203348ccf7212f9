//! Mock indexer manager for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::searcher::{RawHit, SearchError, SearchQuery, Searcher};

/// Mock implementation of the Searcher trait.
///
/// Hits are configured per query string (case-insensitive); unknown queries
/// return nothing. Every query is recorded for assertions.
///
/// # Example
///
/// ```rust,ignore
/// let searcher = MockSearcher::new();
/// searcher.set_hits("the matrix 1999", vec![fixtures::raw_hit("The.Matrix.1999.1080p", "nzb-1")]).await;
///
/// let hits = searcher.search(&SearchQuery::new("The Matrix 1999", SearchCategory::Movies)).await?;
/// assert_eq!(hits.len(), 1);
/// assert_eq!(searcher.recorded_queries().await.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockSearcher {
    hits: Arc<RwLock<HashMap<String, Vec<RawHit>>>>,
    queries: Arc<RwLock<Vec<SearchQuery>>>,
    /// Every search fails with this message while set.
    failure: Arc<RwLock<Option<String>>>,
    unauthorized: Arc<RwLock<bool>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hits returned for `query`.
    pub async fn set_hits(&self, query: &str, hits: Vec<RawHit>) {
        self.hits.write().await.insert(query.to_lowercase(), hits);
    }

    pub async fn set_failure(&self, message: Option<String>) {
        *self.failure.write().await = message;
    }

    pub async fn set_unauthorized(&self, unauthorized: bool) {
        *self.unauthorized.write().await = unauthorized;
    }

    pub async fn recorded_queries(&self) -> Vec<SearchQuery> {
        self.queries.read().await.clone()
    }

    pub async fn search_count(&self) -> usize {
        self.queries.read().await.len()
    }
}

#[async_trait]
impl Searcher for MockSearcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawHit>, SearchError> {
        self.queries.write().await.push(query.clone());

        if *self.unauthorized.read().await {
            return Err(SearchError::Unauthorized);
        }
        if let Some(message) = self.failure.read().await.clone() {
            return Err(SearchError::ApiError(message));
        }

        let mut hits = self
            .hits
            .read()
            .await
            .get(&query.query.to_lowercase())
            .cloned()
            .unwrap_or_default();
        if let Some(limit) = query.limit {
            hits.truncate(limit as usize);
        }
        Ok(hits)
    }
}

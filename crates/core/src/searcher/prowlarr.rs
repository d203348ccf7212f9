//! Prowlarr indexer manager backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::IndexerConfig;

use super::{RawHit, SearchCategory, SearchError, SearchQuery, Searcher, DEFAULT_INDEXER_PRIORITY};

/// Searches every Usenet indexer configured in a Prowlarr instance.
pub struct ProwlarrSearcher {
    client: Client,
    config: IndexerConfig,
}

impl ProwlarrSearcher {
    pub fn new(config: IndexerConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| SearchError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Build the search URL for a query.
    fn build_search_url(&self, query: &SearchQuery) -> String {
        let mut url = format!(
            "{}/api/v1/search?type=search&query={}",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(&query.query)
        );

        let categories = match query.category {
            SearchCategory::Movies => &self.config.movie_categories,
            SearchCategory::Tv => &self.config.tv_categories,
        };
        for cat in categories {
            url.push_str(&format!("&categories={}", cat));
        }

        if let Some(limit) = query.limit {
            url.push_str(&format!("&limit={}", limit));
        }

        url
    }

    fn priority_for(&self, indexer: &str) -> u32 {
        self.config
            .priorities
            .get(indexer)
            .copied()
            .unwrap_or(DEFAULT_INDEXER_PRIORITY)
    }

    fn map_rows(&self, rows: Vec<ProwlarrRow>) -> Vec<RawHit> {
        rows.into_iter()
            .filter(|r| r.protocol.as_deref().map_or(true, |p| p == "usenet"))
            .filter_map(|r| {
                let download_ref = r.download_url.or(r.guid)?;
                let indexer_name = r.indexer.unwrap_or_default();
                Some(RawHit {
                    priority: self.priority_for(&indexer_name),
                    title: r.title,
                    download_ref,
                    indexer_id: r.indexer_id.unwrap_or(0),
                    indexer_name,
                    size_bytes: r.size.unwrap_or(0).max(0) as u64,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Searcher for ProwlarrSearcher {
    fn name(&self) -> &str {
        "prowlarr"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawHit>, SearchError> {
        let start = Instant::now();
        let url = self.build_search_url(query);
        debug!(query = %query.query, "Searching Prowlarr");

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else if e.is_connect() {
                    SearchError::ConnectionFailed(e.to_string())
                } else {
                    SearchError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SearchError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let rows: Vec<ProwlarrRow> = response
            .json()
            .await
            .map_err(|e| SearchError::ApiError(format!("Failed to parse response: {}", e)))?;

        let hits = self.map_rows(rows);
        debug!(
            results = hits.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Prowlarr search complete"
        );
        Ok(hits)
    }
}

// Prowlarr API response types
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProwlarrRow {
    title: String,
    download_url: Option<String>,
    guid: Option<String>,
    indexer_id: Option<u32>,
    indexer: Option<String>,
    size: Option<i64>,
    protocol: Option<String>,
}

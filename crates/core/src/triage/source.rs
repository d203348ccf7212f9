//! NZB retrieval over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{NzbSource, TriageError};

/// Fetches NZB documents from the URL carried in a download reference.
pub struct HttpNzbSource {
    client: Client,
}

impl HttpNzbSource {
    pub fn new(timeout_secs: u32) -> Result<Self, TriageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs as u64))
            .build()
            .map_err(|e| TriageError::Fetch(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NzbSource for HttpNzbSource {
    async fn fetch(&self, download_ref: &str) -> Result<String, TriageError> {
        debug!(download_ref = download_ref, "Fetching NZB");
        let response = self
            .client
            .get(download_ref)
            .send()
            .await
            .map_err(|e| TriageError::Fetch(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(TriageError::Auth(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(TriageError::Fetch(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| TriageError::Fetch(e.to_string()))
    }
}

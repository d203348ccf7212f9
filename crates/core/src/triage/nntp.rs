//! Article presence checks over NNTP.
//!
//! Opens one `nntp_rs::NntpClient` per probe batch, authenticates when
//! credentials are configured and issues one `STAT` per message id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nntp_rs::{NntpClient, NntpError};
use tracing::debug;

use crate::config::UsenetConfig;

use super::{ArticleStatus, ProbeError, UsenetProvider};

/// NNTP availability prober.
pub struct NntpProber {
    config: UsenetConfig,
    server: Arc<nntp_rs::ServerConfig>,
}

impl NntpProber {
    pub fn new(config: UsenetConfig) -> Self {
        let server = Arc::new(nntp_rs::ServerConfig::from(&config));
        Self { config, server }
    }

    async fn run(&self, message_ids: &[String]) -> Result<Vec<ArticleStatus>, ProbeError> {
        let mut client = NntpClient::connect(self.server.clone())
            .await
            .map_err(probe_error)?;
        if self.config.username.is_some() {
            client.authenticate().await.map_err(probe_error)?;
        }

        let mut statuses = Vec::with_capacity(message_ids.len());
        for id in message_ids {
            let status = stat_status(client.stat(&bracketed(id)).await)?;
            if client.is_broken() {
                return Err(ProbeError::Connection("connection broken mid-batch".to_string()));
            }
            statuses.push(status);
        }

        // Best effort, the answers are already in.
        let _ = client.quit().await;
        Ok(statuses)
    }
}

#[async_trait]
impl UsenetProvider for NntpProber {
    async fn probe(&self, message_ids: &[String]) -> Result<Vec<ArticleStatus>, ProbeError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(host = %self.config.host, articles = message_ids.len(), "Probing articles");
        let deadline = Duration::from_secs(self.config.timeout_secs as u64);
        tokio::time::timeout(deadline, self.run(message_ids))
            .await
            .map_err(|_| ProbeError::Timeout)?
    }
}

fn bracketed(message_id: &str) -> String {
    let id = message_id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{}>", id)
}

/// Session-level failures abort the batch; anything else marks one article.
fn stat_status<T>(result: nntp_rs::Result<T>) -> Result<ArticleStatus, ProbeError> {
    match result {
        Ok(_) => Ok(ArticleStatus::Present),
        Err(NntpError::NoSuchArticle(_)) | Err(NntpError::Protocol { code: 430, .. }) => {
            Ok(ArticleStatus::Missing)
        }
        Err(e) if aborts_batch(&e) => Err(probe_error(e)),
        Err(e) => {
            debug!(error = %e, "STAT failed");
            Ok(ArticleStatus::Error)
        }
    }
}

fn aborts_batch(err: &NntpError) -> bool {
    matches!(
        err,
        NntpError::Io(_)
            | NntpError::Tls(_)
            | NntpError::Timeout
            | NntpError::ConnectionClosed
            | NntpError::AuthFailed(_)
            | NntpError::EncryptionRequired(_)
            | NntpError::Protocol {
                code: 480 | 481 | 482 | 502,
                ..
            }
    )
}

fn probe_error(err: NntpError) -> ProbeError {
    match err {
        NntpError::AuthFailed(m) | NntpError::EncryptionRequired(m) => ProbeError::AuthRejected(m),
        NntpError::Protocol {
            code: code @ (480 | 481 | 482 | 502),
            message,
        } => ProbeError::AuthRejected(format!("{} {}", code, message)),
        NntpError::Timeout => ProbeError::Timeout,
        e @ (NntpError::Io(_) | NntpError::Tls(_) | NntpError::ConnectionClosed) => {
            ProbeError::Connection(e.to_string())
        }
        e => ProbeError::Protocol(e.to_string()),
    }
}

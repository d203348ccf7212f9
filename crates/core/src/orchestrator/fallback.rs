//! Bounded walk over backup candidates after an explicit failure.
//!
//! Only terminal signals (backend-reported failure, completed job without
//! media) advance the chain. A client that abandons a stream without any
//! such signal is invisible here: nothing advances until a failure is
//! reported.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, EpisodeNumber, InFlightOrigin, ResolveError, ResolvedStream};
use crate::metrics;

use super::{BackupCandidate, JobResolver, MAX_BACKUPS};

/// Result of a successful chain walk.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub stream: ResolvedStream,
    pub release_name: String,
    /// Backups still unused after the winning link.
    pub backups: Vec<BackupCandidate>,
    /// Resolutions attempted, including the winning one.
    pub attempts: usize,
}

/// Resolves the first working link of a candidate chain.
pub struct FallbackChain {
    jobs: Arc<JobResolver>,
}

impl FallbackChain {
    pub fn new(jobs: Arc<JobResolver>) -> Self {
        Self { jobs }
    }

    /// Resolve `links` in order, spending at most `budget` resolutions.
    ///
    /// Negative-cached links are skipped without spending budget. Terminal
    /// failures advance to the next link; timeouts and credential
    /// rejections surface immediately.
    pub async fn run(
        &self,
        links: &[BackupCandidate],
        category: &str,
        episode: Option<EpisodeNumber>,
        budget: usize,
    ) -> Result<ChainOutcome, ResolveError> {
        if links.is_empty() {
            return Err(ResolveError::NoCandidates);
        }

        let negative = &self.jobs.caches().negative;
        let mut attempts = 0;
        let mut last_error: Option<ResolveError> = None;

        for (idx, link) in links.iter().enumerate() {
            if attempts >= budget {
                break;
            }
            if let Some(hit) = negative.get(&link.download_ref) {
                metrics::FALLBACK_ATTEMPTS.with_label_values(&["skipped"]).inc();
                debug!(download_ref = %link.download_ref, "Skipping known-bad candidate");
                last_error = Some(ResolveError::NegativeCached {
                    download_ref: link.download_ref.clone(),
                    reason: hit.reason,
                    code: hit.code,
                });
                continue;
            }

            attempts += 1;
            let origin = if attempts == 1 {
                InFlightOrigin::Request
            } else {
                InFlightOrigin::Fallback
            };
            let key = CacheKey::new(&link.download_ref, category, episode);

            match self.jobs.resolve(key, origin).await {
                Ok(stream) => {
                    metrics::FALLBACK_ATTEMPTS.with_label_values(&["ready"]).inc();
                    if attempts > 1 {
                        info!(download_ref = %link.download_ref, attempts, "Fallback candidate resolved");
                    }
                    return Ok(ChainOutcome {
                        stream,
                        release_name: link.title.clone(),
                        backups: self.remaining_backups(&links[idx + 1..]),
                        attempts,
                    });
                }
                Err(e) if e.is_terminal() => {
                    metrics::FALLBACK_ATTEMPTS.with_label_values(&["advanced"]).inc();
                    warn!(download_ref = %link.download_ref, error = %e, "Candidate failed, advancing");
                    last_error = Some(e);
                }
                Err(e) => {
                    metrics::FALLBACK_ATTEMPTS.with_label_values(&["surfaced"]).inc();
                    return Err(e);
                }
            }
        }

        match last_error {
            // Every link was already known bad: report why, no work was done.
            Some(e) if attempts == 0 => Err(e),
            Some(e) => {
                metrics::FALLBACK_ATTEMPTS.with_label_values(&["exhausted"]).inc();
                Err(ResolveError::Exhausted {
                    attempts,
                    last_error: e.to_string(),
                })
            }
            None => Err(ResolveError::NoCandidates),
        }
    }

    fn remaining_backups(&self, rest: &[BackupCandidate]) -> Vec<BackupCandidate> {
        let negative = &self.jobs.caches().negative;
        rest.iter()
            .filter(|b| !negative.contains(&b.download_ref))
            .take(MAX_BACKUPS)
            .cloned()
            .collect()
    }
}

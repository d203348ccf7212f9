//! Windowed availability triage over a candidate pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TriageConfig;
use crate::metrics;
use crate::searcher::Candidate;

use super::nzb::{parse_nzb, NzbDocument};
use super::{
    ArticleStatus, NzbSource, ProbeError, TriageDecision, TriageError, TriageStatus,
    UsenetProvider,
};

/// Decisions from one triage run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TriageReport {
    /// Latest decision per triaged candidate, in pool order.
    pub decisions: Vec<TriageDecision>,
    pub rounds: usize,
}

impl TriageReport {
    pub fn status_of(&self, download_ref: &str) -> Option<TriageStatus> {
        self.decisions
            .iter()
            .find(|d| d.download_ref == download_ref)
            .map(|d| d.status)
    }

    /// Copy each decision's status onto the matching candidate.
    pub fn apply(&self, candidates: &mut [Candidate]) {
        for candidate in candidates.iter_mut() {
            if let Some(status) = self.status_of(&candidate.download_ref) {
                candidate.status = Some(status);
            }
        }
    }

    pub fn count(&self, status: TriageStatus) -> usize {
        self.decisions.iter().filter(|d| d.status == status).count()
    }
}

/// Classifies candidates by probing a sample of their articles.
pub struct TriageVerifier {
    source: Arc<dyn NzbSource>,
    provider: Option<Arc<dyn UsenetProvider>>,
    config: TriageConfig,
}

impl TriageVerifier {
    pub fn new(
        source: Arc<dyn NzbSource>,
        provider: Option<Arc<dyn UsenetProvider>>,
        config: TriageConfig,
    ) -> Self {
        Self {
            source,
            provider,
            config,
        }
    }

    /// Classify one candidate. Sampling is deterministic, so an unchanged
    /// candidate against an unchanged provider classifies the same way.
    pub async fn verify(&self, candidate: &Candidate) -> TriageDecision {
        self.verify_inner(candidate).await.0
    }

    /// Second value is true when a collaborator rejected our credentials.
    async fn verify_inner(&self, candidate: &Candidate) -> (TriageDecision, bool) {
        let (decision, auth_rejected) = self.classify(candidate).await;
        metrics::TRIAGE_DECISIONS
            .with_label_values(&[decision.status.as_str()])
            .inc();
        (decision, auth_rejected)
    }

    async fn classify(&self, candidate: &Candidate) -> (TriageDecision, bool) {
        let decision = |status| TriageDecision::new(&candidate.download_ref, &candidate.title, status);

        if let Some(verdict) = candidate.blocked.as_ref().filter(|v| v.blocked) {
            let mut d = decision(TriageStatus::Blocked);
            d.pattern = verdict.pattern.clone();
            d.reason = verdict.category.clone();
            return (d, false);
        }

        let xml = match self.source.fetch(&candidate.download_ref).await {
            Ok(xml) => xml,
            Err(e @ TriageError::Auth(_)) => {
                return (decision(TriageStatus::Error).with_reason(e.to_string()), true)
            }
            Err(e) => return (decision(TriageStatus::Error).with_reason(e.to_string()), false),
        };

        let doc = match parse_nzb(&xml) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(download_ref = %candidate.download_ref, error = %e, "Unreadable NZB");
                return (decision(TriageStatus::Error).with_reason(e.to_string()), false);
            }
        };

        if doc.is_archived() {
            return (
                decision(TriageStatus::UnverifiedArchived).with_reason("content is archived"),
                false,
            );
        }

        let sample = sample_ids(&doc, self.config.sample_size);
        if sample.is_empty() {
            return (decision(TriageStatus::Error).with_reason("no media files"), false);
        }

        let Some(provider) = &self.provider else {
            return (
                decision(TriageStatus::Unverified).with_reason("no usenet provider configured"),
                false,
            );
        };

        let statuses = match provider.probe(&sample).await {
            Ok(statuses) => statuses,
            Err(e @ ProbeError::AuthRejected(_)) => {
                return (decision(TriageStatus::Error).with_reason(e.to_string()), true)
            }
            Err(e) => {
                debug!(download_ref = %candidate.download_ref, error = %e, "Probe inconclusive");
                return (decision(TriageStatus::Unverified).with_reason(e.to_string()), false);
            }
        };

        if statuses.len() != sample.len() {
            return (
                decision(TriageStatus::Unverified).with_reason(format!(
                    "provider answered {} of {} articles",
                    statuses.len(),
                    sample.len()
                )),
                false,
            );
        }

        let missing = statuses.iter().filter(|s| **s == ArticleStatus::Missing).count();
        let errors = statuses.iter().filter(|s| **s == ArticleStatus::Error).count();

        let mut d = if missing > 0 {
            decision(TriageStatus::Error).with_reason(format!(
                "{} of {} sampled articles missing",
                missing,
                sample.len()
            ))
        } else if errors > 0 {
            decision(TriageStatus::Unverified).with_reason(format!(
                "{} of {} sampled articles inconclusive",
                errors,
                sample.len()
            ))
        } else {
            decision(TriageStatus::Verified)
        };
        d.sampled = sample.len();
        d.missing = missing;
        (d, false)
    }

    /// Triage a pool in bounded windows.
    ///
    /// Blocked candidates get a decision without a probe and never take a
    /// window slot. Each round probes up to `window` candidates, untried ones
    /// first, topped up with previously unverified ones. Rounds stop as soon
    /// as one candidate verifies, after `max_rounds`, or when credentials
    /// are rejected.
    pub async fn triage(&self, candidates: &[Candidate]) -> TriageReport {
        let mut decisions: HashMap<String, TriageDecision> = HashMap::new();
        let mut pool: Vec<&Candidate> = Vec::new();

        for candidate in candidates {
            if candidate.is_blocked() {
                let (d, _) = self.verify_inner(candidate).await;
                decisions.insert(candidate.download_ref.clone(), d);
            } else {
                pool.push(candidate);
            }
        }

        let window = self.config.window.max(1);
        let concurrency = self.config.probe_concurrency.max(1);
        let mut tried: HashSet<&str> = HashSet::new();
        let mut rounds = 0;

        while rounds < self.config.max_rounds {
            let mut selection: Vec<&Candidate> = pool
                .iter()
                .copied()
                .filter(|c| !tried.contains(c.download_ref.as_str()))
                .take(window)
                .collect();

            if selection.len() < window {
                let retry = pool.iter().copied().filter(|c| {
                    decisions
                        .get(&c.download_ref)
                        .is_some_and(|d| d.status == TriageStatus::Unverified)
                });
                let room = window - selection.len();
                selection.extend(retry.take(room));
            }

            if selection.is_empty() {
                break;
            }
            rounds += 1;

            let pending: Vec<_> = selection.iter().map(|c| self.verify_inner(c)).collect();
            let results: Vec<(TriageDecision, bool)> = stream::iter(pending)
                .buffer_unordered(concurrency)
                .collect()
                .await;

            let mut verified = false;
            let mut auth_rejected = false;
            for (d, auth) in results {
                verified |= d.status == TriageStatus::Verified;
                auth_rejected |= auth;
                decisions.insert(d.download_ref.clone(), d);
            }
            tried.extend(selection.iter().map(|c| c.download_ref.as_str()));

            if verified {
                break;
            }
            if auth_rejected {
                warn!("Triage stopped: credentials rejected");
                break;
            }
            debug!(round = rounds, "No candidate verified in window");
        }

        let ordered: Vec<TriageDecision> = candidates
            .iter()
            .filter_map(|c| decisions.remove(&c.download_ref))
            .collect();

        let report = TriageReport {
            decisions: ordered,
            rounds,
        };
        info!(
            rounds = report.rounds,
            verified = report.count(TriageStatus::Verified),
            unverified = report.count(TriageStatus::Unverified),
            blocked = report.count(TriageStatus::Blocked),
            "Triage complete"
        );
        report
    }
}

/// Evenly spread sample over every media segment, first and last included.
fn sample_ids(doc: &NzbDocument, sample_size: usize) -> Vec<String> {
    let all: Vec<&String> = doc.media_files().flat_map(|f| f.segments.iter()).collect();
    let n = all.len();
    if n == 0 || sample_size == 0 {
        return Vec::new();
    }
    if n <= sample_size {
        return all.into_iter().cloned().collect();
    }
    if sample_size == 1 {
        return vec![all[0].clone()];
    }

    let mut picked: Vec<usize> = (0..sample_size)
        .map(|i| i * (n - 1) / (sample_size - 1))
        .collect();
    picked.dedup();
    picked.into_iter().map(|i| all[i].clone()).collect()
}

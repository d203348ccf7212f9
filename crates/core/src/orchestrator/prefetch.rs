//! Speculative resolution of the most promising candidates.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheKey, EntryStatus, EpisodeNumber, InFlightOrigin};
use crate::config::PrefetchConfig;
use crate::metrics;
use crate::searcher::Candidate;
use crate::triage::TriageStatus;

use super::JobResolver;

/// Candidates chosen for prefetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrefetchPlan {
    pub selected: Vec<Candidate>,
    /// No verified candidate existed; `selected` holds at most one unverified.
    pub degraded: bool,
}

impl PrefetchPlan {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

fn is_eligible(candidate: &Candidate) -> bool {
    !candidate.is_blocked() && candidate.status != Some(TriageStatus::Blocked)
}

/// Verified candidates in priority order, preferred language first.
pub fn verified_in_order<'a>(
    candidates: &'a [Candidate],
    preferred_language: Option<&str>,
) -> Vec<&'a Candidate> {
    let mut verified: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| is_eligible(c) && c.status == Some(TriageStatus::Verified))
        .collect();
    if let Some(language) = preferred_language {
        // Stable: pool order is kept within each group.
        verified.sort_by_key(|c| !c.has_language(language));
    }
    verified
}

/// Unverified candidates in priority order; plain unverified before archived.
pub fn unverified_in_order(candidates: &[Candidate]) -> Vec<&Candidate> {
    let mut unverified: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| is_eligible(c) && c.status.is_some_and(|s| s.is_unverified()))
        .collect();
    unverified.sort_by_key(|c| c.status == Some(TriageStatus::UnverifiedArchived));
    unverified
}

/// Choose up to `count` verified candidates, skipping any `excluded` one.
/// Without a verified candidate, choose the single best unverified one.
pub fn select_prefetch<F>(
    candidates: &[Candidate],
    config: &PrefetchConfig,
    excluded: F,
) -> PrefetchPlan
where
    F: Fn(&Candidate) -> bool,
{
    let verified = verified_in_order(candidates, config.preferred_language.as_deref());
    if !verified.is_empty() {
        return PrefetchPlan {
            selected: verified
                .into_iter()
                .filter(|c| !excluded(c))
                .take(config.count)
                .cloned()
                .collect(),
            degraded: false,
        };
    }

    PrefetchPlan {
        selected: unverified_in_order(candidates)
            .into_iter()
            .find(|c| !excluded(c))
            .cloned()
            .into_iter()
            .collect(),
        degraded: true,
    }
}

/// Starts background resolutions for a plan.
pub struct Prefetcher {
    jobs: Arc<JobResolver>,
}

impl Prefetcher {
    pub fn new(jobs: Arc<JobResolver>) -> Self {
        Self { jobs }
    }

    /// Claim each selected reference in the in-flight tracker and resolve
    /// the claimed ones in the background. References someone else already
    /// claimed are skipped. Returns the references started.
    pub fn start(
        &self,
        plan: &PrefetchPlan,
        category: &str,
        episode: Option<EpisodeNumber>,
    ) -> Vec<String> {
        let kind = if plan.degraded { "degraded" } else { "verified" };
        let mut started = Vec::new();

        for candidate in &plan.selected {
            let caches = self.jobs.caches();
            let key = CacheKey::new(&candidate.download_ref, category, episode);
            if caches.negative.contains(&candidate.download_ref) {
                continue;
            }
            // Pending, ready and failed keys need no new attempt; only a
            // fresh attempt releases the slot claimed below.
            if caches
                .resolution
                .status(&key)
                .is_some_and(|s| s != EntryStatus::TimeoutPending)
            {
                continue;
            }
            if !caches
                .in_flight
                .try_register(&candidate.download_ref, InFlightOrigin::Prefetch)
            {
                debug!(download_ref = %candidate.download_ref, "Already in flight, not prefetching");
                continue;
            }

            metrics::PREFETCH_STARTED.with_label_values(&[kind]).inc();
            info!(download_ref = %candidate.download_ref, title = %candidate.title, degraded = plan.degraded, "Prefetching");

            let jobs = Arc::clone(&self.jobs);
            tokio::spawn(async move {
                if let Err(e) = jobs.resolve(key.clone(), InFlightOrigin::Prefetch).await {
                    debug!(download_ref = %key.download_ref, error = %e, "Prefetch did not produce media");
                }
            });
            started.push(candidate.download_ref.clone());
        }

        started
    }
}

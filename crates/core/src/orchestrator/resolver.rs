//! Request pipeline: instant cache, search, history, triage, prefetch and
//! single-flight resolution.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::{DownloadBackend, DownloadJob, PlayableMedia};
use crate::blocklist::BlocklistChecker;
use crate::cache::{CacheStore, ResolveError, ResolvedStream};
use crate::config::{BackendConfig, HistoryConfig, PrefetchConfig, ResolverConfig};
use crate::history::{HistoryIndex, HistoryMatcher};
use crate::metrics;
use crate::searcher::{search_all, Candidate, SearchCategory, SearchError, SearchQuery, Searcher};
use crate::triage::{TriageStatus, TriageVerifier};
use crate::watcher::WaiterRegistry;

use super::prefetch::{unverified_in_order, verified_in_order};
use super::{
    select_prefetch, BackupCandidate, FallbackChain, JobResolver, PlaybackFailure,
    PlaybackRequest, Prefetcher, StreamRef, StreamSource,
};

/// Collaborators the resolver is built from.
pub struct ResolverDeps {
    pub searcher: Arc<dyn Searcher>,
    pub blocklist: Arc<dyn BlocklistChecker>,
    pub verifier: Arc<TriageVerifier>,
    pub backend: Arc<dyn DownloadBackend>,
    pub caches: Arc<CacheStore>,
    pub waiters: Option<Arc<WaiterRegistry>>,
}

/// Settings the resolver reads.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub resolver: ResolverConfig,
    pub history: HistoryConfig,
    pub prefetch: PrefetchConfig,
    pub movie_category: String,
    pub tv_category: String,
}

impl ResolverSettings {
    pub fn new(
        resolver: ResolverConfig,
        history: HistoryConfig,
        prefetch: PrefetchConfig,
        backend: &BackendConfig,
    ) -> Self {
        Self {
            resolver,
            history,
            prefetch,
            movie_category: backend.movie_category.clone(),
            tv_category: backend.tv_category.clone(),
        }
    }
}

/// Entry point turning playback requests into stream references.
pub struct StreamResolver {
    searcher: Arc<dyn Searcher>,
    blocklist: Arc<dyn BlocklistChecker>,
    verifier: Arc<TriageVerifier>,
    backend: Arc<dyn DownloadBackend>,
    caches: Arc<CacheStore>,
    matcher: HistoryMatcher,
    prefetcher: Prefetcher,
    chain: FallbackChain,
    settings: ResolverSettings,
}

impl StreamResolver {
    pub fn new(deps: ResolverDeps, settings: ResolverSettings) -> Self {
        let jobs = Arc::new(JobResolver::new(
            Arc::clone(&deps.backend),
            Arc::clone(&deps.caches),
            deps.waiters,
            settings.resolver.clone(),
            settings.history.scan_limit,
        ));
        Self {
            searcher: deps.searcher,
            blocklist: deps.blocklist,
            verifier: deps.verifier,
            backend: deps.backend,
            caches: deps.caches,
            matcher: HistoryMatcher::from_config(&settings.history),
            prefetcher: Prefetcher::new(Arc::clone(&jobs)),
            chain: FallbackChain::new(jobs),
            settings,
        }
    }

    pub fn caches(&self) -> &Arc<CacheStore> {
        &self.caches
    }

    fn category_for(&self, request: &PlaybackRequest) -> (&str, SearchCategory) {
        if request.is_series() {
            (&self.settings.tv_category, SearchCategory::Tv)
        } else {
            (&self.settings.movie_category, SearchCategory::Movies)
        }
    }

    /// Resolve a playback request to a stream reference.
    pub async fn resolve(&self, request: &PlaybackRequest) -> Result<StreamRef, ResolveError> {
        let (category, search_category) = self.category_for(request);

        if let Some(stream) = self.instant_lookup(request, category) {
            return Ok(stream);
        }

        let queries: Vec<SearchQuery> = request
            .queries()
            .into_iter()
            .map(|q| SearchQuery::new(q, search_category))
            .collect();
        let candidates = search_all(self.searcher.as_ref(), &queries, self.blocklist.as_ref())
            .await
            .map_err(|e| match e {
                SearchError::Unauthorized => {
                    ResolveError::Auth("indexer manager rejected credentials".to_string())
                }
                other => ResolveError::Search(other.to_string()),
            })?;
        info!(title = %request.title, candidates = candidates.len(), "Search complete");

        // Known-bad references are neither probed nor resolved again.
        let (known_bad, mut candidates): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| self.caches.negative.contains(&c.download_ref));
        if candidates.iter().all(|c| c.is_blocked()) {
            let rejected = known_bad.iter().find_map(|c| {
                self.caches
                    .negative
                    .get(&c.download_ref)
                    .map(|hit| ResolveError::NegativeCached {
                        download_ref: c.download_ref.clone(),
                        reason: hit.reason,
                        code: hit.code,
                    })
            });
            if rejected.is_some() {
                metrics::NEGATIVE_CACHE_REJECTIONS.inc();
            }
            return Err(rejected.unwrap_or(ResolveError::NoCandidates));
        }

        let (history_refs, history_hit) = self.history_pass(request, &candidates, category).await;
        if let Some(stream) = history_hit {
            return Ok(stream);
        }

        let report = self.verifier.triage(&candidates).await;
        report.apply(&mut candidates);
        debug!(
            verified = report.count(TriageStatus::Verified),
            rounds = report.rounds,
            "Triage complete"
        );

        let episode = request.episode_number();
        let plan = select_prefetch(&candidates, &self.settings.prefetch, |c| {
            history_refs.contains(&c.download_ref) || self.caches.in_flight.contains(&c.download_ref)
        });
        self.prefetcher.start(&plan, category, episode);

        let links = chain_links(&candidates, self.settings.prefetch.preferred_language.as_deref());
        let outcome = self
            .chain
            .run(&links, category, episode, self.settings.resolver.max_attempts)
            .await?;

        let mut stream = StreamRef::from_resolved(
            request.content.clone(),
            category,
            &outcome.release_name,
            outcome.stream,
            StreamSource::Download,
        );
        stream.backups = outcome.backups;
        stream.attempts = outcome.attempts;
        self.remember(&stream);
        Ok(stream)
    }

    /// Report a terminal playback failure and move to the next backup.
    ///
    /// The failed reference is negative-cached and forgotten by the
    /// resolution and instant caches. Attempts already spent on the
    /// request count against the bound.
    pub async fn advance(
        &self,
        stream: &StreamRef,
        failure: PlaybackFailure,
    ) -> Result<StreamRef, ResolveError> {
        warn!(download_ref = %stream.download_ref, failure = failure.code(), "Playback failed, advancing");
        self.caches.negative.insert(
            &stream.download_ref,
            &format!("playback failed: {}", failure.code()),
            failure.code(),
        );
        self.caches.resolution.invalidate_ref(&stream.download_ref);
        self.forget_instant(stream);

        let spent = stream.attempts.max(1);
        let budget = self.settings.resolver.max_attempts.saturating_sub(spent);
        if budget == 0 || stream.backups.is_empty() {
            metrics::FALLBACK_ATTEMPTS.with_label_values(&["exhausted"]).inc();
            return Err(ResolveError::Exhausted {
                attempts: spent,
                last_error: format!("{} ({})", failure.code(), stream.download_ref),
            });
        }

        let outcome = self
            .chain
            .run(&stream.backups, &stream.category, stream.content.episode, budget)
            .await
            .map_err(|e| match e {
                ResolveError::Exhausted { attempts, last_error } => ResolveError::Exhausted {
                    attempts: attempts + spent,
                    last_error,
                },
                other => other,
            })?;

        let mut next = StreamRef::from_resolved(
            stream.content.clone(),
            &stream.category,
            &outcome.release_name,
            outcome.stream,
            StreamSource::Download,
        );
        next.backups = outcome.backups;
        next.attempts = spent + outcome.attempts;
        self.remember(&next);
        Ok(next)
    }

    fn instant_lookup(&self, request: &PlaybackRequest, category: &str) -> Option<StreamRef> {
        match self.caches.instant.get(&request.content) {
            Ok(Some(entry)) => {
                metrics::INSTANT_CACHE_HITS.inc();
                info!(key = %request.content.storage_key(), job_id = %entry.job_id, "Instant cache hit");
                Some(StreamRef::from_resolved(
                    request.content.clone(),
                    category,
                    &entry.release_name,
                    ResolvedStream {
                        download_ref: entry.download_ref,
                        job_id: entry.job_id,
                        media: entry.media,
                    },
                    StreamSource::Instant,
                ))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Instant cache lookup failed");
                None
            }
        }
    }

    /// Match candidates against completed history. Returns the references
    /// that matched and, when one of them still holds playable media, a
    /// stream for it. Blocked candidates never take part.
    async fn history_pass(
        &self,
        request: &PlaybackRequest,
        candidates: &[Candidate],
        category: &str,
    ) -> (HashSet<String>, Option<StreamRef>) {
        let mut matched_refs = HashSet::new();

        let jobs = match self.backend.history(self.settings.history.scan_limit).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "History unavailable, skipping instant playback");
                return (matched_refs, None);
            }
        };
        // A blocked release in history is never offered for playback.
        let jobs: Vec<DownloadJob> = jobs
            .into_iter()
            .filter(|j| !self.blocklist.check(&j.name).blocked)
            .collect();
        let index = HistoryIndex::from_jobs(&jobs);
        if index.is_empty() {
            return (matched_refs, None);
        }

        let eligible: Vec<&Candidate> = candidates.iter().filter(|c| !c.is_blocked()).collect();
        let titles: Vec<String> = eligible.iter().map(|c| c.title.clone()).collect();
        let matches = self.matcher.match_batch(&titles, &index);

        let mut hits = Vec::new();
        for (candidate, m) in eligible.iter().zip(matches) {
            if let Some(m) = m {
                let kind = if m.exact { "exact" } else { "fuzzy" };
                metrics::HISTORY_MATCHES.with_label_values(&[kind]).inc();
                matched_refs.insert(candidate.download_ref.clone());
                hits.push((*candidate, m));
            }
        }

        for (candidate, m) in hits {
            let Some(job) = jobs.iter().find(|j| j.job_id == m.job_id) else {
                continue;
            };
            match self.playable_from_history(job).await {
                Some(resolved) => {
                    info!(job_id = %job.job_id, title = %candidate.title, score = m.score, "Playing from history");
                    let stream = StreamRef::from_resolved(
                        request.content.clone(),
                        category,
                        &job.name,
                        ResolvedStream {
                            download_ref: candidate.download_ref.clone(),
                            job_id: job.job_id.clone(),
                            media: resolved,
                        },
                        StreamSource::History,
                    );
                    self.remember(&stream);
                    return (matched_refs, Some(stream));
                }
                None => debug!(job_id = %job.job_id, "History match has no playable media"),
            }
        }

        (matched_refs, None)
    }

    async fn playable_from_history(&self, job: &DownloadJob) -> Option<PlayableMedia> {
        match self.backend.resolve_playable(job).await {
            Ok(media) => media,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Could not list history job");
                None
            }
        }
    }

    fn remember(&self, stream: &StreamRef) {
        if let Err(e) = self.caches.instant.put(
            stream.content.clone(),
            &stream.download_ref,
            &stream.release_name,
            &stream.media,
        ) {
            error!(error = %e, "Failed to write instant cache");
        }
    }

    fn forget_instant(&self, stream: &StreamRef) {
        match self.caches.instant.get(&stream.content) {
            Ok(Some(entry)) if entry.download_ref == stream.download_ref => {
                if let Err(e) = self.caches.instant.remove(&stream.content) {
                    error!(error = %e, "Failed to drop instant cache entry");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Instant cache lookup failed"),
        }
    }
}

/// Candidates in resolution order: verified (preferred language first),
/// then unverified.
fn chain_links(candidates: &[Candidate], preferred_language: Option<&str>) -> Vec<BackupCandidate> {
    verified_in_order(candidates, preferred_language)
        .into_iter()
        .chain(unverified_in_order(candidates))
        .map(|c| BackupCandidate {
            download_ref: c.download_ref.clone(),
            title: c.title.clone(),
        })
        .collect()
}

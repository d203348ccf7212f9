//! Turns a download reference into playable media through the single-flight
//! resolution cache.
//!
//! A resolution enqueues (or joins) one backend job via the in-flight
//! tracker, then races the completion watcher against polling until the job
//! settles or the deadline passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, DownloadBackend, DownloadJob, JobStatus};
use crate::cache::{CacheKey, CacheStore, InFlightOrigin, ResolveError, ResolvedStream};
use crate::config::ResolverConfig;
use crate::metrics;
use crate::watcher::{WaiterRegistry, WatcherError};

/// Cancels a registered waiter when dropped. Once the waiter has settled
/// the cancel is a no-op.
struct WaiterGuard<'a> {
    registry: &'a WaiterRegistry,
    job_id: String,
    waiter_id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.registry.cancel(&self.job_id, self.waiter_id) {
            debug!(job_id = %self.job_id, "Cancelled completion waiter");
        }
    }
}

/// Resolves backend jobs for download references.
pub struct JobResolver {
    backend: Arc<dyn DownloadBackend>,
    caches: Arc<CacheStore>,
    waiters: Option<Arc<WaiterRegistry>>,
    config: ResolverConfig,
    scan_limit: usize,
}

impl JobResolver {
    pub fn new(
        backend: Arc<dyn DownloadBackend>,
        caches: Arc<CacheStore>,
        waiters: Option<Arc<WaiterRegistry>>,
        config: ResolverConfig,
        scan_limit: usize,
    ) -> Self {
        Self {
            backend,
            caches,
            waiters,
            config,
            scan_limit,
        }
    }

    pub fn caches(&self) -> &Arc<CacheStore> {
        &self.caches
    }

    /// Resolve `key` to playable media.
    ///
    /// Known-bad references are rejected from the negative cache without
    /// touching the backend. Otherwise concurrent calls for the same key
    /// share one attempt.
    pub async fn resolve(
        self: &Arc<Self>,
        key: CacheKey,
        origin: InFlightOrigin,
    ) -> Result<ResolvedStream, ResolveError> {
        if let Some(hit) = self.caches.negative.get(&key.download_ref) {
            metrics::NEGATIVE_CACHE_REJECTIONS.inc();
            debug!(download_ref = %key.download_ref, code = %hit.code, "Rejected by negative cache");
            // Nothing enqueues a negative-cached reference, so a jobless
            // slot here can only be a stale prefetch claim.
            if self.caches.in_flight.job_id(&key.download_ref).is_none() {
                self.caches.in_flight.release(&key.download_ref);
            }
            return Err(ResolveError::NegativeCached {
                download_ref: key.download_ref,
                reason: hit.reason,
                code: hit.code,
            });
        }

        let this = Arc::clone(self);
        let attempt_key = key.clone();
        self.caches
            .resolution
            .resolve(key, move || async move { this.run(attempt_key, origin).await })
            .await
    }

    async fn run(&self, key: CacheKey, origin: InFlightOrigin) -> Result<ResolvedStream, ResolveError> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.resolve_timeout_secs);

        let result = match tokio::time::timeout(deadline, self.attempt(&key, origin)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(format!(
                "{} not playable within {}s",
                key.download_ref, self.config.resolve_timeout_secs
            ))),
        };

        let label = match &result {
            Ok(_) => "ready",
            Err(e) => e.code(),
        };
        metrics::RESOLUTIONS.with_label_values(&[label]).inc();
        metrics::RESOLUTION_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(stream) => {
                info!(download_ref = %key.download_ref, job_id = %stream.job_id, "Resolved playable media");
                self.caches.in_flight.release(&key.download_ref);
            }
            Err(e) if e.is_terminal() => {
                warn!(download_ref = %key.download_ref, error = %e, "Resolution failed");
                self.caches
                    .negative
                    .insert(&key.download_ref, &e.to_string(), e.code());
                self.caches.in_flight.release(&key.download_ref);
            }
            Err(e) => {
                // The job may still finish; its slot stays parked so a retry joins it.
                warn!(download_ref = %key.download_ref, error = %e, "Resolution inconclusive");
                self.caches.in_flight.park(&key.download_ref);
            }
        }
        result
    }

    async fn attempt(&self, key: &CacheKey, origin: InFlightOrigin) -> Result<ResolvedStream, ResolveError> {
        let backend = Arc::clone(&self.backend);
        let download_ref = key.download_ref.clone();
        let category = key.category.clone();

        let job_id = self
            .caches
            .in_flight
            .job_for(&key.download_ref, origin, move || async move {
                let job_id = backend.enqueue(&download_ref, &category).await?;
                info!(download_ref = %download_ref, job_id = %job_id, "Enqueued download");
                Ok::<_, BackendError>(job_id)
            })
            .await?;

        let job = self.await_completion(&job_id).await?;
        let media = self
            .backend
            .resolve_playable(&job)
            .await?
            .ok_or_else(|| ResolveError::NoPlayableMedia {
                job_id: job_id.clone(),
            })?;

        Ok(ResolvedStream {
            download_ref: key.download_ref.clone(),
            job_id,
            media,
        })
    }

    /// Wait for `job_id` to complete, racing the watcher against polling.
    ///
    /// The waiter is cancelled whichever side wins. A watcher timeout falls
    /// back to polling alone.
    pub async fn await_completion(&self, job_id: &str) -> Result<DownloadJob, ResolveError> {
        let Some(registry) = &self.waiters else {
            return self.poll_until_done(job_id).await;
        };

        let handle = registry.register(job_id);
        let _guard = WaiterGuard {
            registry,
            job_id: job_id.to_string(),
            waiter_id: handle.waiter_id,
        };

        let poll = self.poll_until_done(job_id);
        tokio::pin!(poll);
        let wait = handle.wait();
        tokio::pin!(wait);

        tokio::select! {
            outcome = &mut wait => match outcome {
                Ok(()) => {
                    metrics::COMPLETION_SOURCE.with_label_values(&["watcher"]).inc();
                    // Fresh poll: the event carries no storage details.
                    self.poll_until_done(job_id).await
                }
                Err(WatcherError::JobFailed { message, .. }) => {
                    metrics::COMPLETION_SOURCE.with_label_values(&["watcher"]).inc();
                    Err(ResolveError::BackendFailure {
                        job_id: Some(job_id.to_string()),
                        message,
                    })
                }
                Err(e) => {
                    debug!(job_id = job_id, error = %e, "Watcher gave up, polling");
                    poll.await
                }
            },
            job = &mut poll => job,
        }
    }

    async fn poll_until_done(&self, job_id: &str) -> Result<DownloadJob, ResolveError> {
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            match self.backend.find_job(job_id, self.scan_limit).await {
                Ok(Some(job)) if job.status == JobStatus::Completed => {
                    metrics::COMPLETION_SOURCE.with_label_values(&["poll"]).inc();
                    return Ok(job);
                }
                Ok(Some(job)) if job.status == JobStatus::Failed => {
                    metrics::COMPLETION_SOURCE.with_label_values(&["poll"]).inc();
                    return Err(ResolveError::BackendFailure {
                        job_id: Some(job.job_id),
                        message: job
                            .fail_message
                            .unwrap_or_else(|| "download failed".to_string()),
                    });
                }
                Ok(Some(job)) => {
                    debug!(job_id = job_id, status = job.status.as_str(), "Job in progress");
                }
                Ok(None) => debug!(job_id = job_id, "Job not listed yet"),
                Err(e @ BackendError::AuthenticationFailed(_)) => return Err(e.into()),
                Err(e) => warn!(job_id = job_id, error = %e, "Job poll failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PlayableMedia;
    use crate::cache::EntryStatus;
    use crate::config::CacheConfig;
    use crate::testing::MockDownloadBackend;
    use crate::watcher::JobEvent;

    fn resolver_config() -> ResolverConfig {
        ResolverConfig {
            resolve_timeout_secs: 30,
            poll_interval_ms: 50,
            max_attempts: 3,
        }
    }

    fn setup(
        waiters: Option<Arc<WaiterRegistry>>,
    ) -> (Arc<JobResolver>, Arc<MockDownloadBackend>, Arc<CacheStore>) {
        let backend = Arc::new(MockDownloadBackend::new());
        let caches = Arc::new(CacheStore::in_memory(&CacheConfig::default()).unwrap());
        let resolver = Arc::new(JobResolver::new(
            backend.clone(),
            caches.clone(),
            waiters,
            resolver_config(),
            50,
        ));
        (resolver, backend, caches)
    }

    fn key(download_ref: &str) -> CacheKey {
        CacheKey::new(download_ref, "movies", None)
    }

    #[tokio::test]
    async fn test_resolves_completed_job() {
        let (resolver, backend, caches) = setup(None);
        backend.complete_on_enqueue("nzb-1", Some("Movie.2020.1080p.mkv")).await;

        let stream = resolver.resolve(key("nzb-1"), InFlightOrigin::Request).await.unwrap();
        assert_eq!(stream.download_ref, "nzb-1");
        assert!(stream.media.path.ends_with("Movie.2020.1080p.mkv"));
        assert_eq!(backend.enqueue_count().await, 1);
        assert!(caches.in_flight.is_empty());
        assert_eq!(caches.resolution.status(&key("nzb-1")), Some(EntryStatus::Ready));
    }

    #[tokio::test]
    async fn test_backend_failure_is_negative_cached() {
        let (resolver, backend, caches) = setup(None);
        backend.fail_on_enqueue("nzb-bad", "Out of retention").await;

        let err = resolver.resolve(key("nzb-bad"), InFlightOrigin::Request).await.unwrap_err();
        assert!(matches!(err, ResolveError::BackendFailure { ref message, .. } if message == "Out of retention"));
        assert!(caches.negative.contains("nzb-bad"));
        assert!(!caches.in_flight.contains("nzb-bad"));

        // A different key for the same reference never reaches the backend.
        let other = CacheKey::new("nzb-bad", "tv", None);
        let err = resolver.resolve(other, InFlightOrigin::Request).await.unwrap_err();
        assert!(matches!(err, ResolveError::NegativeCached { .. }));
        assert_eq!(backend.enqueue_count().await, 1);
    }

    #[tokio::test]
    async fn test_completed_job_without_media() {
        let (resolver, backend, caches) = setup(None);
        backend.complete_on_enqueue("nzb-empty", None).await;

        let err = resolver.resolve(key("nzb-empty"), InFlightOrigin::Request).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoPlayableMedia { .. }));
        assert!(caches.negative.contains("nzb-empty"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_job_in_flight() {
        let (resolver, backend, caches) = setup(None);
        backend.hold_on_enqueue("nzb-slow").await;

        let err = resolver.resolve(key("nzb-slow"), InFlightOrigin::Request).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            caches.resolution.status(&key("nzb-slow")),
            Some(EntryStatus::TimeoutPending)
        );
        let job_id = caches.in_flight.job_id("nzb-slow").unwrap();

        // The job finishes out of band; the retry joins it instead of enqueuing again.
        backend.finish_job(&job_id, Some("Slow.Movie.mkv")).await;
        let stream = resolver.resolve(key("nzb-slow"), InFlightOrigin::Request).await.unwrap();
        assert_eq!(stream.job_id, job_id);
        assert_eq!(backend.enqueue_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_slot_lapses_without_retry() {
        let (resolver, backend, caches) = setup(None);
        backend.hold_on_enqueue("nzb-slow").await;

        let err = resolver.resolve(key("nzb-slow"), InFlightOrigin::Request).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(caches.in_flight.contains("nzb-slow"));

        let ttl = CacheConfig::default().timeout_pending_ttl_secs;
        tokio::time::advance(Duration::from_secs(ttl + 1)).await;

        assert_eq!(caches.resolution.status(&key("nzb-slow")), None);
        assert!(!caches.in_flight.contains("nzb-slow"));
        assert!(caches.in_flight.try_register("nzb-slow", InFlightOrigin::Prefetch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_timeout_falls_back_to_polling() {
        // Waiter gives up after 1s; the resolve deadline is 30s.
        let registry = Arc::new(WaiterRegistry::new(1_000));
        let (resolver, backend, _caches) = setup(Some(registry.clone()));
        backend.hold_on_enqueue("nzb-1").await;
        let polled_before = metrics::COMPLETION_SOURCE.with_label_values(&["poll"]).get();

        // Finish the job well after the waiter deadline, without any event.
        let finisher = {
            let backend = backend.clone();
            tokio::spawn(async move {
                let job_id = loop {
                    if let Some(job) = backend.enqueued_jobs().await.first().cloned() {
                        break job;
                    }
                    tokio::task::yield_now().await;
                };
                tokio::time::sleep(Duration::from_secs(5)).await;
                backend.finish_job(&job_id, Some("Movie.mkv")).await;
                job_id
            })
        };

        let started = Instant::now();
        let stream = resolver.resolve(key("nzb-1"), InFlightOrigin::Request).await.unwrap();
        let job_id = finisher.await.unwrap();

        assert_eq!(stream.job_id, job_id);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(registry.is_empty());
        assert!(metrics::COMPLETION_SOURCE.with_label_values(&["poll"]).get() > polled_before);
    }

    #[tokio::test]
    async fn test_auth_rejection_surfaces() {
        let (resolver, backend, caches) = setup(None);
        backend.set_auth_failure(true).await;

        let err = resolver.resolve(key("nzb-1"), InFlightOrigin::Request).await.unwrap_err();
        assert!(err.is_auth());
        assert!(!caches.negative.contains("nzb-1"));
        assert!(caches.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_watcher_event_wins_and_waiter_is_cleared() {
        let registry = Arc::new(WaiterRegistry::new(80_000));
        let (resolver, backend, _caches) = setup(Some(registry.clone()));
        backend.hold_on_enqueue("nzb-1").await;

        let task = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(key("nzb-1"), InFlightOrigin::Request).await })
        };

        // Wait for the waiter to be registered, then finish the job and push the event.
        let job_id = loop {
            if let Some(job) = backend.enqueued_jobs().await.first().cloned() {
                if !registry.is_empty() {
                    break job;
                }
            }
            tokio::task::yield_now().await;
        };
        backend.finish_job(&job_id, Some("Movie.mkv")).await;
        registry.handle_event(&JobEvent {
            job_id: job_id.clone(),
            status: JobStatus::Completed,
            fail_message: None,
        });

        let stream = task.await.unwrap().unwrap();
        assert_eq!(stream.job_id, job_id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_polling_wins_and_cancels_waiter() {
        let registry = Arc::new(WaiterRegistry::new(80_000));
        let (resolver, backend, _caches) = setup(Some(registry.clone()));
        backend.complete_on_enqueue("nzb-1", Some("Movie.mkv")).await;

        let stream = resolver.resolve(key("nzb-1"), InFlightOrigin::Request).await.unwrap();
        assert_eq!(
            stream.media,
            PlayableMedia {
                job_id: stream.job_id.clone(),
                path: "/movies/Movie.mkv".to_string(),
                url: "http://backend.test/movies/Movie.mkv".to_string(),
                size_bytes: 1_000_000,
            }
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_watcher_failure_event_is_terminal() {
        let registry = Arc::new(WaiterRegistry::new(80_000));
        let (resolver, backend, caches) = setup(Some(registry.clone()));
        backend.hold_on_enqueue("nzb-1").await;

        let task = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(key("nzb-1"), InFlightOrigin::Request).await })
        };

        let job_id = loop {
            if let Some(job) = backend.enqueued_jobs().await.first().cloned() {
                if !registry.is_empty() {
                    break job;
                }
            }
            tokio::task::yield_now().await;
        };
        registry.handle_event(&JobEvent {
            job_id,
            status: JobStatus::Failed,
            fail_message: Some("CRC error".to_string()),
        });

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ResolveError::BackendFailure { ref message, .. } if message == "CRC error"));
        assert!(caches.negative.contains("nzb-1"));
    }
}

//! End-to-end resolution tests through the public API with mock
//! collaborators: single-flight, negative cache, blocklist, history,
//! instant cache and the fallback chain.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use nzbstream_core::{
    blocklist::Blocklist,
    cache::{CacheKey, CacheStore, InFlightOrigin},
    config::{
        BlocklistRule, CacheConfig, HistoryConfig, PatternKind, PrefetchConfig, ResolverConfig,
        TriageConfig,
    },
    searcher::RawHit,
    testing::{fixtures, MockDownloadBackend, MockNzbSource, MockSearcher, MockUsenetProvider},
    JobResolver, PlaybackFailure, PlaybackRequest, ResolveError, ResolverDeps, ResolverSettings,
    StreamResolver, StreamSource, TriageVerifier, UsenetProvider,
};

const QUERY: &str = "the matrix 1999";

fn resolver_config() -> ResolverConfig {
    ResolverConfig {
        resolve_timeout_secs: 5,
        poll_interval_ms: 10,
        max_attempts: 3,
    }
}

/// Test helper wiring a `StreamResolver` to mocks.
struct Harness {
    searcher: Arc<MockSearcher>,
    backend: Arc<MockDownloadBackend>,
    source: Arc<MockNzbSource>,
    provider: Arc<MockUsenetProvider>,
    caches: Arc<CacheStore>,
    resolver: StreamResolver,
}

impl Harness {
    fn new(blocklist: Blocklist, prefetch_count: usize) -> Self {
        let searcher = Arc::new(MockSearcher::new());
        let backend = Arc::new(MockDownloadBackend::new());
        let source = Arc::new(MockNzbSource::new());
        let provider = Arc::new(MockUsenetProvider::new());
        let caches = Arc::new(CacheStore::in_memory(&CacheConfig::default()).expect("cache store"));

        let verifier = Arc::new(TriageVerifier::new(
            source.clone(),
            Some(provider.clone() as Arc<dyn UsenetProvider>),
            TriageConfig {
                window: 4,
                sample_size: 4,
                max_rounds: 2,
                probe_concurrency: 2,
            },
        ));

        let resolver = StreamResolver::new(
            ResolverDeps {
                searcher: searcher.clone(),
                blocklist: Arc::new(blocklist),
                verifier,
                backend: backend.clone(),
                caches: caches.clone(),
                waiters: None,
            },
            ResolverSettings {
                resolver: resolver_config(),
                history: HistoryConfig::default(),
                prefetch: PrefetchConfig {
                    count: prefetch_count,
                    preferred_language: None,
                },
                movie_category: "movies".to_string(),
                tv_category: "tv".to_string(),
            },
        );

        Self {
            searcher,
            backend,
            source,
            provider,
            caches,
            resolver,
        }
    }

    /// Publish releases for the test query. Earlier releases are larger and
    /// so rank first. Every release gets an NZB whose single article exists.
    async fn publish(&self, releases: &[(&str, &str)]) {
        let mut hits: Vec<RawHit> = Vec::new();
        for (i, (title, download_ref)) in releases.iter().enumerate() {
            let mut hit = fixtures::raw_hit(title, download_ref);
            hit.size_bytes = 10_000_000_000 - (i as u64) * 1_000_000;
            hits.push(hit);

            let article = format!("{}-seg1", download_ref);
            self.source
                .set_nzb(download_ref, fixtures::nzb_xml(&format!("{}.mkv", download_ref), &[&article]))
                .await;
            self.provider.set_present(&[&article]).await;
        }
        self.searcher.set_hits(QUERY, hits).await;
    }
}

fn request() -> PlaybackRequest {
    PlaybackRequest::movie("tt0133093", "The Matrix", Some(1999))
}

#[tokio::test]
async fn test_concurrent_resolutions_create_one_job() {
    let backend = Arc::new(MockDownloadBackend::new());
    backend.set_enqueue_delay(Duration::from_millis(50)).await;
    let caches = Arc::new(CacheStore::in_memory(&CacheConfig::default()).unwrap());
    let jobs = Arc::new(JobResolver::new(
        backend.clone(),
        caches.clone(),
        None,
        resolver_config(),
        50,
    ));

    let calls = (0..16).map(|i| {
        let jobs = jobs.clone();
        let origin = if i % 2 == 0 {
            InFlightOrigin::Request
        } else {
            InFlightOrigin::Prefetch
        };
        async move {
            jobs.resolve(CacheKey::new("nzb-shared", "movies", None), origin)
                .await
        }
    });
    let results = join_all(calls).await;

    assert_eq!(backend.enqueue_count().await, 1);
    let job_ids: HashSet<String> = results
        .into_iter()
        .map(|r| r.expect("resolution succeeds").job_id)
        .collect();
    assert_eq!(job_ids.len(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_never_duplicate_a_download() {
    let harness = Arc::new(Harness::new(Blocklist::empty(), 2));
    harness
        .publish(&[
            ("The.Matrix.1999.2160p.UHD.BluRay.x265-AAA", "nzb-a"),
            ("The.Matrix.1999.1080p.BluRay.x264-BBB", "nzb-b"),
        ])
        .await;
    harness.backend.set_enqueue_delay(Duration::from_millis(20)).await;

    let calls = (0..4).map(|_| {
        let harness = harness.clone();
        async move { harness.resolver.resolve(&request()).await }
    });
    for result in join_all(calls).await {
        result.expect("request resolves");
    }
    // Let background prefetches settle.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let refs = harness.backend.enqueued_refs().await;
    let unique: HashSet<&String> = refs.iter().collect();
    assert_eq!(unique.len(), refs.len(), "duplicate enqueue in {:?}", refs);
}

#[tokio::test]
async fn test_known_bad_resource_is_rejected_without_new_work() {
    let harness = Harness::new(Blocklist::empty(), 1);
    harness
        .publish(&[("The.Matrix.1999.1080p.BluRay.x264-BAD", "nzb-bad")])
        .await;
    harness.backend.fail_on_enqueue("nzb-bad", "Out of retention").await;

    let err = harness.resolver.resolve(&request()).await.unwrap_err();
    assert!(
        matches!(err, ResolveError::Exhausted { attempts: 1, .. }),
        "unexpected error: {:?}",
        err
    );
    let probes = harness.provider.probe_calls().await.len();
    let enqueues = harness.backend.enqueue_count().await;

    let err = harness.resolver.resolve(&request()).await.unwrap_err();
    assert!(matches!(err, ResolveError::NegativeCached { .. }), "unexpected error: {:?}", err);
    assert_eq!(harness.provider.probe_calls().await.len(), probes);
    assert_eq!(harness.backend.enqueue_count().await, enqueues);
}

#[tokio::test]
async fn test_blocked_candidates_are_never_prefetched_or_played() {
    let blocklist = Blocklist::from_rules(&[BlocklistRule {
        pattern: "cam".to_string(),
        kind: PatternKind::Word,
        category: Some("quality".to_string()),
    }])
    .unwrap();
    let harness = Harness::new(blocklist, 3);
    harness
        .publish(&[
            ("The.Matrix.1999.CAM.x264-BAD", "nzb-cam"),
            ("The.Matrix.1999.1080p.BluRay.x264-GOOD", "nzb-good"),
        ])
        .await;
    // History holds the blocked release; it must not be offered.
    harness
        .backend
        .add_history_job("old-cam", "The.Matrix.1999.CAM.x264-BAD", "movies", Some("cam.mkv"))
        .await;

    let stream = harness.resolver.resolve(&request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(stream.download_ref, "nzb-good");
    assert_eq!(stream.source, StreamSource::Download);
    assert!(!harness
        .backend
        .enqueued_refs()
        .await
        .contains(&"nzb-cam".to_string()));
    assert!(harness.source.fetch_count().await <= 1);
}

#[tokio::test]
async fn test_history_match_plays_instantly() {
    let harness = Harness::new(Blocklist::empty(), 1);
    harness
        .publish(&[("The.Matrix.1999.1080p.BluRay.x264-GOOD", "nzb-good")])
        .await;
    harness
        .backend
        .add_history_job("done-1", "The.Matrix.1999.1080p.BluRay.x264-GOOD", "movies", Some("matrix.mkv"))
        .await;

    let stream = harness.resolver.resolve(&request()).await.unwrap();
    assert_eq!(stream.source, StreamSource::History);
    assert_eq!(stream.job_id, "done-1");
    assert_eq!(harness.backend.enqueue_count().await, 0);
    assert!(harness.provider.probe_calls().await.is_empty());
}

#[tokio::test]
async fn test_second_request_is_served_from_instant_cache() {
    let harness = Harness::new(Blocklist::empty(), 1);
    harness
        .publish(&[("The.Matrix.1999.1080p.BluRay.x264-GOOD", "nzb-good")])
        .await;

    let first = harness.resolver.resolve(&request()).await.unwrap();
    assert_eq!(first.source, StreamSource::Download);
    let searches = harness.searcher.search_count().await;

    let second = harness.resolver.resolve(&request()).await.unwrap();
    assert_eq!(second.source, StreamSource::Instant);
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(harness.searcher.search_count().await, searches);
    assert_eq!(harness.caches.stats().unwrap().instant, 1);
}

#[tokio::test]
async fn test_fallback_chain_walks_backups() {
    let harness = Harness::new(Blocklist::empty(), 1);
    harness
        .publish(&[
            ("The.Matrix.1999.2160p.UHD.BluRay.x265-AAA", "nzb-a"),
            ("The.Matrix.1999.1080p.BluRay.x264-BBB", "nzb-b"),
            ("The.Matrix.1999.1080p.WEB.x264-CCC", "nzb-c"),
            ("The.Matrix.1999.720p.WEB.x264-DDD", "nzb-d"),
        ])
        .await;
    harness.backend.fail_on_enqueue("nzb-a", "Out of retention").await;
    harness.backend.complete_on_enqueue("nzb-b", None).await;

    let stream = harness.resolver.resolve(&request()).await.unwrap();
    assert_eq!(stream.download_ref, "nzb-c");
    assert_eq!(stream.attempts, 3);
    assert_eq!(stream.backups.len(), 1);
    assert_eq!(stream.backups[0].download_ref, "nzb-d");
    assert!(harness.caches.negative.contains("nzb-a"));
    assert!(harness.caches.negative.contains("nzb-b"));

    // Three attempts spent: a reported failure ends the chain.
    let err = harness
        .resolver
        .advance(&stream, PlaybackFailure::NoPlayableMedia)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Exhausted { attempts: 3, .. }));
    assert!(harness.caches.negative.contains("nzb-c"));
}

#[tokio::test]
async fn test_advance_moves_to_next_backup() {
    let harness = Harness::new(Blocklist::empty(), 1);
    harness
        .publish(&[
            ("The.Matrix.1999.2160p.UHD.BluRay.x265-AAA", "nzb-a"),
            ("The.Matrix.1999.1080p.BluRay.x264-BBB", "nzb-b"),
            ("The.Matrix.1999.720p.WEB.x264-CCC", "nzb-c"),
        ])
        .await;

    let stream = harness.resolver.resolve(&request()).await.unwrap();
    assert_eq!(stream.download_ref, "nzb-a");
    assert_eq!(stream.attempts, 1);
    let backups: Vec<&str> = stream.backups.iter().map(|b| b.download_ref.as_str()).collect();
    assert_eq!(backups, vec!["nzb-b", "nzb-c"]);

    let next = harness
        .resolver
        .advance(&stream, PlaybackFailure::BackendFailure)
        .await
        .unwrap();
    assert_eq!(next.download_ref, "nzb-b");
    assert_eq!(next.attempts, 2);
    assert_eq!(next.backups.len(), 1);

    // The instant cache now points at the replacement.
    let again = harness.resolver.resolve(&request()).await.unwrap();
    assert_eq!(again.source, StreamSource::Instant);
    assert_eq!(again.download_ref, "nzb-b");
}

//! Prometheus metrics for core components.
//!
//! Core only increments these; the server registers them and exposes the
//! registry.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Search and triage
// =============================================================================

/// Candidates produced per aggregated search.
pub static SEARCH_CANDIDATES: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "nzbstream_search_candidates",
            "Number of deduplicated candidates per search",
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        &[],
    )
    .unwrap()
});

/// Triage decisions by status.
pub static TRIAGE_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nzbstream_triage_decisions_total", "Triage decisions"),
        &["status"], // "verified", "unverified", "unverified_archived", "blocked", "error"
    )
    .unwrap()
});

/// History matches found during the batch pre-pass.
pub static HISTORY_MATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nzbstream_history_matches_total", "History matches by kind"),
        &["kind"], // "exact", "fuzzy"
    )
    .unwrap()
});

// =============================================================================
// Caches
// =============================================================================

/// Resolution cache lookups by outcome.
pub static RESOLUTION_CACHE_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "nzbstream_resolution_cache_events_total",
            "Resolution cache lookups",
        ),
        &["outcome"], // "joined", "hit", "failed_hit", "miss"
    )
    .unwrap()
});

/// Resolutions rejected straight from the negative cache.
pub static NEGATIVE_CACHE_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nzbstream_negative_cache_rejections_total",
        "Resolutions rejected by the negative cache",
    )
    .unwrap()
});

/// Requests served from the instant cache.
pub static INSTANT_CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nzbstream_instant_cache_hits_total",
        "Requests served from the instant cache",
    )
    .unwrap()
});

// =============================================================================
// Resolution
// =============================================================================

/// Job resolutions by result code.
pub static RESOLUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nzbstream_resolutions_total", "Job resolutions by result"),
        &["result"], // "ready" or a ResolveError code
    )
    .unwrap()
});

/// Time from enqueue to playable media.
pub static RESOLUTION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "nzbstream_resolution_duration_seconds",
            "Duration of a job resolution",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["result"],
    )
    .unwrap()
});

/// Which path observed job completion first.
pub static COMPLETION_SOURCE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "nzbstream_completion_source_total",
            "Path that observed job completion",
        ),
        &["source"], // "watcher", "poll"
    )
    .unwrap()
});

/// Speculative resolutions started.
pub static PREFETCH_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nzbstream_prefetch_started_total", "Prefetches started"),
        &["kind"], // "verified", "degraded"
    )
    .unwrap()
});

/// Fallback chain steps.
pub static FALLBACK_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nzbstream_fallback_attempts_total", "Fallback chain steps"),
        &["result"], // "ready", "skipped", "advanced", "exhausted", "surfaced"
    )
    .unwrap()
});

/// Event stream reconnect attempts.
pub static WATCHER_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nzbstream_watcher_reconnects_total",
        "Event stream reconnect attempts",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(SEARCH_CANDIDATES.clone()),
        Box::new(TRIAGE_DECISIONS.clone()),
        Box::new(HISTORY_MATCHES.clone()),
        Box::new(RESOLUTION_CACHE_EVENTS.clone()),
        Box::new(NEGATIVE_CACHE_REJECTIONS.clone()),
        Box::new(INSTANT_CACHE_HITS.clone()),
        Box::new(RESOLUTIONS.clone()),
        Box::new(RESOLUTION_DURATION.clone()),
        Box::new(COMPLETION_SOURCE.clone()),
        Box::new(PREFETCH_STARTED.clone()),
        Box::new(FALLBACK_ATTEMPTS.clone()),
        Box::new(WATCHER_RECONNECTS.clone()),
    ]
}

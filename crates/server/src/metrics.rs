//! Prometheus metrics for the HTTP surface.
//!
//! Request latency and counts are recorded here. Cache tier sizes are
//! collected from the live [`CacheStore`](nzbstream_core::CacheStore) when
//! metrics are scraped; resolution metrics live in the core crate and are
//! registered alongside.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "nzbstream_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nzbstream_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "nzbstream_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Cache Metrics (collected dynamically)
// =============================================================================

/// Entries per cache tier.
pub static CACHE_ENTRIES: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("nzbstream_cache_entries", "Current entry count per cache tier"),
        &["tier"],
    )
    .unwrap()
});

/// Event stream connection state (1 = connected, 0 = disconnected).
pub static WATCHER_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "nzbstream_watcher_connected",
        "Whether the job event stream is connected",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry.register(Box::new(CACHE_ENTRIES.clone())).unwrap();
    registry
        .register(Box::new(WATCHER_CONNECTED.clone()))
        .unwrap();

    // Resolution, triage and cache event metrics
    for metric in nzbstream_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges from current application state before encoding.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    match state.caches().stats() {
        Ok(stats) => {
            for (tier, count) in [
                ("pending", stats.pending),
                ("ready", stats.ready),
                ("failed", stats.failed),
                ("timeout_pending", stats.timeout_pending),
                ("negative", stats.negative),
                ("instant", stats.instant),
                ("in_flight", stats.in_flight),
            ] {
                CACHE_ENTRIES.with_label_values(&[tier]).set(count as i64);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to read cache stats"),
    }

    if let Some(connected) = state.watcher_connected() {
        WATCHER_CONNECTED.set(i64::from(connected));
    }
}

static NUMERIC_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\d+(/|$)").expect("numeric segment pattern"));
static HASH_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9a-fA-F]{32,64}").expect("hash segment pattern"));

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = HASH_SEGMENT.replace_all(path, "{hash}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}

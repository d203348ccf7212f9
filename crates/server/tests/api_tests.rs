//! API tests running the full router in-process against mocks.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestFixture;

const QUERY: &str = "the matrix 1999";

fn matrix_request() -> serde_json::Value {
    json!({
        "content": { "kind": "movie", "id": "tt0133093" },
        "title": "The Matrix",
        "year": 1999
    })
}

// =============================================================================
// Basic API Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["backend"], "mock");
    assert!(response.body.get("watcher_connected").is_none());
}

#[tokio::test]
async fn test_config_hides_credentials() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/config").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["backend"]["credentials_configured"], true);
    assert_eq!(response.body["blocklist_rules"], 1);
    assert!(!response.text.contains("backend-secret"));
    assert!(!response.text.contains("indexer-secret"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let response = fixture.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text.contains("nzbstream_http_requests_total"));
    assert!(response.text.contains("nzbstream_cache_entries"));
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_resolve_returns_stream() {
    let fixture = TestFixture::new().await;
    fixture
        .publish(QUERY, &[("The.Matrix.1999.1080p.BluRay.x264-GRP", "nzb-a")])
        .await;

    let response = fixture.post("/api/v1/resolve", matrix_request()).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["download_ref"], "nzb-a");
    assert_eq!(response.body["source"], "download");
    assert_eq!(response.body["category"], "movies");
    assert_eq!(response.body["media"]["url"], "http://backend.test/movies/nzb-a.mkv");
    assert_eq!(fixture.backend.enqueue_count().await, 1);
}

#[tokio::test]
async fn test_resolve_without_candidates_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.post("/api/v1/resolve", matrix_request()).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["code"], "no_candidates");
    assert_eq!(fixture.backend.enqueue_count().await, 0);
}

#[tokio::test]
async fn test_resolve_skips_blocked_release() {
    let fixture = TestFixture::new().await;
    fixture
        .publish(
            QUERY,
            &[
                ("The.Matrix.1999.2160p.CAM-BAD", "nzb-cam"),
                ("The.Matrix.1999.1080p.BluRay-GRP", "nzb-good"),
            ],
        )
        .await;

    let response = fixture.post("/api/v1/resolve", matrix_request()).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["download_ref"], "nzb-good");
    assert_eq!(fixture.backend.enqueued_refs().await, vec!["nzb-good"]);
}

#[tokio::test]
async fn test_resolve_search_failure_is_bad_gateway() {
    let fixture = TestFixture::new().await;
    fixture.searcher.set_failure(Some("indexer down".to_string())).await;

    let response = fixture.post("/api/v1/resolve", matrix_request()).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body["code"], "search");
}

#[tokio::test]
async fn test_resolve_rejects_malformed_request() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/resolve", json!({ "title": "No content key" }))
        .await;

    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_second_resolve_served_from_instant_cache() {
    let fixture = TestFixture::new().await;
    fixture
        .publish(QUERY, &[("The.Matrix.1999.1080p.BluRay-GRP", "nzb-a")])
        .await;

    let first = fixture.post("/api/v1/resolve", matrix_request()).await;
    assert_eq!(first.status, StatusCode::OK);
    let searches = fixture.searcher.search_count().await;

    let second = fixture.post("/api/v1/resolve", matrix_request()).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["source"], "instant");
    assert_eq!(second.body["download_ref"], "nzb-a");
    assert_eq!(fixture.searcher.search_count().await, searches);
}

#[tokio::test]
async fn test_fallback_moves_to_backup() {
    let fixture = TestFixture::new().await;
    fixture
        .publish(
            QUERY,
            &[
                ("The.Matrix.1999.2160p.UHD-GRP", "nzb-a"),
                ("The.Matrix.1999.1080p.BluRay-GRP", "nzb-b"),
            ],
        )
        .await;

    let first = fixture.post("/api/v1/resolve", matrix_request()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["download_ref"], "nzb-a");
    assert_eq!(first.body["backups"][0]["download_ref"], "nzb-b");

    let next = fixture
        .post(
            "/api/v1/resolve/fallback",
            json!({ "stream": first.body, "failure": "backend_failure" }),
        )
        .await;

    assert_eq!(next.status, StatusCode::OK);
    assert_eq!(next.body["download_ref"], "nzb-b");
    assert_eq!(next.body["attempts"], 2);

    let stats = fixture.get("/api/v1/cache/stats").await;
    assert_eq!(stats.body["negative"], 1);
}

#[tokio::test]
async fn test_fallback_without_backups_is_exhausted() {
    let fixture = TestFixture::new().await;
    fixture
        .publish(QUERY, &[("The.Matrix.1999.1080p.BluRay-GRP", "nzb-a")])
        .await;

    let first = fixture.post("/api/v1/resolve", matrix_request()).await;
    assert_eq!(first.status, StatusCode::OK);

    let next = fixture
        .post(
            "/api/v1/resolve/fallback",
            json!({ "stream": first.body, "failure": "no_playable_media" }),
        )
        .await;

    assert_eq!(next.status, StatusCode::BAD_GATEWAY);
    assert_eq!(next.body["code"], "exhausted");
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let fixture = TestFixture::new().await;
    fixture
        .publish(QUERY, &[("The.Matrix.1999.1080p.BluRay-GRP", "nzb-a")])
        .await;
    fixture.post("/api/v1/resolve", matrix_request()).await;

    let stats = fixture.get("/api/v1/cache/stats").await;
    assert_eq!(stats.status, StatusCode::OK);
    assert_eq!(stats.body["instant"], 1);
    assert_eq!(stats.body["ready"], 1);

    let cleared = fixture.delete("/api/v1/cache").await;
    assert_eq!(cleared.status, StatusCode::OK);

    let stats = fixture.get("/api/v1/cache/stats").await;
    assert_eq!(stats.body["instant"], 0);
    assert_eq!(stats.body["ready"], 0);
    assert_eq!(stats.body["negative"], 0);
}

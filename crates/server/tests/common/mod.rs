//! Common test utilities for in-process API testing with mocks.
//!
//! The fixture wires the real router and [`StreamResolver`] to scripted
//! collaborators, so no indexer, download backend or usenet provider is
//! needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use nzbstream_core::{
    load_config_from_str,
    searcher::RawHit,
    testing::{MockDownloadBackend, MockNzbSource, MockSearcher, MockUsenetProvider},
    Blocklist, CacheStore, Config, ResolverDeps, ResolverSettings, StreamResolver,
    TriageVerifier, UsenetProvider,
};
use nzbstream_server::state::AppState;

/// Re-export fixtures for test convenience
pub use nzbstream_core::testing::fixtures;

pub const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 8080

[indexer]
url = "http://indexer.test"
api_key = "indexer-secret"

[backend]
url = "http://backend.test"
api_key = "backend-secret"

[resolver]
resolve_timeout_secs = 5
poll_interval_ms = 10
max_attempts = 3

[prefetch]
count = 1

[[blocklist.rules]]
pattern = "cam"
kind = "word"
category = "cam"
"#;

/// Test fixture for API testing with mock dependencies.
pub struct TestFixture {
    pub router: Router,
    pub searcher: Arc<MockSearcher>,
    pub backend: Arc<MockDownloadBackend>,
    pub source: Arc<MockNzbSource>,
    pub provider: Arc<MockUsenetProvider>,
    pub state: Arc<AppState>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let config: Config = load_config_from_str(CONFIG).expect("Failed to parse test config");

        let searcher = Arc::new(MockSearcher::new());
        let backend = Arc::new(MockDownloadBackend::new());
        let source = Arc::new(MockNzbSource::new());
        let provider = Arc::new(MockUsenetProvider::new());

        let caches = Arc::new(CacheStore::in_memory(&config.cache).expect("Failed to create caches"));
        let verifier = Arc::new(TriageVerifier::new(
            source.clone(),
            Some(provider.clone() as Arc<dyn UsenetProvider>),
            config.triage.clone(),
        ));
        let blocklist =
            Blocklist::from_rules(&config.blocklist.rules).expect("Failed to build blocklist");

        let resolver = Arc::new(StreamResolver::new(
            ResolverDeps {
                searcher: searcher.clone(),
                blocklist: Arc::new(blocklist),
                verifier,
                backend: backend.clone(),
                caches,
                waiters: None,
            },
            ResolverSettings::new(
                config.resolver.clone(),
                config.history.clone(),
                config.prefetch.clone(),
                &config.backend,
            ),
        ));

        let state = Arc::new(AppState::new(config, resolver, "mock", None));
        let router = nzbstream_server::api::create_router(state.clone());

        Self {
            router,
            searcher,
            backend,
            source,
            provider,
            state,
        }
    }

    /// Publish releases for `query`. Earlier releases are larger and rank
    /// first; each gets an NZB whose single article exists.
    pub async fn publish(&self, query: &str, releases: &[(&str, &str)]) {
        let mut hits: Vec<RawHit> = Vec::new();
        for (i, (title, download_ref)) in releases.iter().enumerate() {
            let mut hit = fixtures::raw_hit(title, download_ref);
            hit.size_bytes = 10_000_000_000 - (i as u64) * 1_000_000;
            hits.push(hit);

            let article = format!("{}-seg1", download_ref);
            self.source
                .set_nzb(
                    download_ref,
                    fixtures::nzb_xml(&format!("{}.mkv", download_ref), &[&article]),
                )
                .await;
            self.provider.set_present(&[&article]).await;
        }
        self.searcher.set_hits(query, hits).await;
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

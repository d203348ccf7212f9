use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nzbstream_core::{CacheStore, Config, SanitizedConfig, StreamResolver};

/// Shared application state
pub struct AppState {
    config: Config,
    resolver: Arc<StreamResolver>,
    backend_name: String,
    watcher_connected: Option<Arc<AtomicBool>>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: Config,
        resolver: Arc<StreamResolver>,
        backend_name: impl Into<String>,
        watcher_connected: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            config,
            resolver,
            backend_name: backend_name.into(),
            watcher_connected,
            started_at: Utc::now(),
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn resolver(&self) -> &StreamResolver {
        self.resolver.as_ref()
    }

    pub fn caches(&self) -> &CacheStore {
        self.resolver.caches().as_ref()
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// `None` when no event stream is configured.
    pub fn watcher_connected(&self) -> Option<bool> {
        self.watcher_connected
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

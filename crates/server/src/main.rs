use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nzbstream_core::{
    load_config, validate_config, BlocklistChecker, Blocklist, CacheStore, CompletionWatcher,
    DownloadBackend, HttpNzbSource, InstantCache, NntpProber, ProwlarrSearcher, ResolverDeps,
    ResolverSettings, SabnzbdBackend, Searcher, StreamResolver, TriageVerifier, UsenetProvider,
    WaiterRegistry,
};
use nzbstream_server::api::create_router;
use nzbstream_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("NZBSTREAM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(config_hash = &config_hash[..16], "Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    let backend: Arc<dyn DownloadBackend> = Arc::new(
        SabnzbdBackend::new(config.backend.clone()).context("Failed to create download backend")?,
    );
    info!("Download backend: {} at {}", backend.name(), config.backend.url);

    let searcher: Arc<dyn Searcher> = Arc::new(
        ProwlarrSearcher::new(config.indexer.clone()).context("Failed to create indexer client")?,
    );
    info!("Indexer aggregator at {}", config.indexer.url);

    let blocklist: Arc<dyn BlocklistChecker> = Arc::new(
        Blocklist::from_rules(&config.blocklist.rules).context("Invalid blocklist rules")?,
    );
    info!("Blocklist loaded with {} rules", config.blocklist.rules.len());

    let nzb_source = Arc::new(
        HttpNzbSource::new(config.indexer.timeout_secs).context("Failed to create NZB fetcher")?,
    );
    let provider: Option<Arc<dyn UsenetProvider>> = match &config.usenet {
        Some(usenet) => {
            info!("Availability probes via {}:{}", usenet.host, usenet.port);
            Some(Arc::new(NntpProber::new(usenet.clone())))
        }
        None => {
            warn!("No usenet provider configured, candidates stay unverified");
            None
        }
    };
    let verifier = Arc::new(TriageVerifier::new(nzb_source, provider, config.triage.clone()));

    let instant = InstantCache::open(&config.database.path, config.cache.instant_ttl_secs)
        .context("Failed to open instant cache")?;
    let caches = Arc::new(CacheStore::new(&config.cache, instant));
    info!("Cache store initialized");

    // Completion watcher when the backend offers a push stream
    let (waiters, watcher) = match &config.backend.event_stream_url {
        Some(url) => {
            let registry = Arc::new(WaiterRegistry::new(config.watcher.waiter_timeout_ms));
            let handle = CompletionWatcher::new(
                url.clone(),
                config.backend.api_key.clone(),
                config.watcher.clone(),
                Arc::clone(&registry),
            )
            .spawn();
            info!("Completion watcher started for {}", url);
            (Some(registry), Some(handle))
        }
        None => {
            info!("No event stream configured, completion is detected by polling");
            (None, None)
        }
    };

    let resolver = Arc::new(StreamResolver::new(
        ResolverDeps {
            searcher,
            blocklist,
            verifier,
            backend: Arc::clone(&backend),
            caches,
            waiters,
        },
        ResolverSettings::new(
            config.resolver.clone(),
            config.history.clone(),
            config.prefetch.clone(),
            &config.backend,
        ),
    ));

    let state = Arc::new(AppState::new(
        config.clone(),
        resolver,
        backend.name(),
        watcher.as_ref().map(|w| w.connected_flag()),
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub indexer: IndexerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub usenet: Option<UsenetConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub blocklist: BlocklistConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    7000
}

/// Database configuration (holds the durable instant cache)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("nzbstream.db")
}

/// Indexer manager (Prowlarr-compatible) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexerConfig {
    /// Base URL (e.g., "http://localhost:9696")
    pub url: String,
    pub api_key: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// Newznab categories used for movie searches
    #[serde(default = "default_movie_categories")]
    pub movie_categories: Vec<u32>,
    /// Newznab categories used for series searches
    #[serde(default = "default_tv_categories")]
    pub tv_categories: Vec<u32>,
    /// Per-indexer priority keyed by indexer name. Lower wins, unknown = 25.
    #[serde(default)]
    pub priorities: HashMap<String, u32>,
}

fn default_timeout() -> u32 {
    30
}

fn default_movie_categories() -> Vec<u32> {
    vec![2000]
}

fn default_tv_categories() -> Vec<u32> {
    vec![5000]
}

/// Download backend (SABnzbd-compatible API) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    #[serde(default = "default_movie_category")]
    pub movie_category: String,
    #[serde(default = "default_tv_category")]
    pub tv_category: String,
    /// WebDAV root used to list completed job content
    #[serde(default)]
    pub webdav_url: Option<String>,
    #[serde(default)]
    pub webdav_username: Option<String>,
    #[serde(default)]
    pub webdav_password: Option<String>,
    /// Push event stream (WebSocket). Polling only when absent.
    #[serde(default)]
    pub event_stream_url: Option<String>,
}

fn default_movie_category() -> String {
    "movies".to_string()
}

fn default_tv_category() -> String {
    "tv".to_string()
}

/// Usenet provider used for availability probes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsenetConfig {
    pub host: String,
    #[serde(default = "default_nntp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Accept self-signed provider certificates.
    #[serde(default)]
    pub allow_insecure_tls: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_nntp_port() -> u16 {
    563
}

impl From<&UsenetConfig> for nntp_rs::ServerConfig {
    fn from(config: &UsenetConfig) -> Self {
        nntp_rs::ServerConfig {
            host: config.host.clone(),
            port: config.port,
            tls: true,
            allow_insecure_tls: config.allow_insecure_tls,
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
        }
    }
}

/// Cache tier TTLs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// TTL for ready/failed resolution entries. 0 = never expire.
    #[serde(default = "default_resolution_ttl")]
    pub resolution_ttl_secs: u64,
    /// TTL for `timeout_pending` entries (short; the job may finish out-of-band).
    #[serde(default = "default_timeout_pending_ttl")]
    pub timeout_pending_ttl_secs: u64,
    /// TTL for negative entries. 0 = negative cache disabled.
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_secs: u64,
    /// TTL for instant cache entries. 0 = never expire.
    #[serde(default = "default_instant_ttl")]
    pub instant_ttl_secs: u64,
}

fn default_resolution_ttl() -> u64 {
    3600
}

fn default_timeout_pending_ttl() -> u64 {
    120
}

fn default_negative_ttl() -> u64 {
    6 * 3600
}

fn default_instant_ttl() -> u64 {
    7 * 24 * 3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resolution_ttl_secs: default_resolution_ttl(),
            timeout_pending_ttl_secs: default_timeout_pending_ttl(),
            negative_ttl_secs: default_negative_ttl(),
            instant_ttl_secs: default_instant_ttl(),
        }
    }
}

/// Triage (availability verification) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TriageConfig {
    /// Candidates probed per round.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Message-ids sampled per candidate.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Rounds attempted before giving up on finding a verified candidate.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Concurrent candidate probes.
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

fn default_window() -> usize {
    4
}

fn default_sample_size() -> usize {
    6
}

fn default_max_rounds() -> usize {
    3
}

fn default_probe_concurrency() -> usize {
    2
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            sample_size: default_sample_size(),
            max_rounds: default_max_rounds(),
            probe_concurrency: default_probe_concurrency(),
        }
    }
}

/// History matcher settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub scan_limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Only accept subset matches, ignoring the score threshold.
    #[serde(default)]
    pub strict: bool,
}

fn default_history_limit() -> usize {
    200
}

fn default_min_similarity() -> f32 {
    0.6
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            scan_limit: default_history_limit(),
            min_similarity: default_min_similarity(),
            strict: false,
        }
    }
}

/// Prefetch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_prefetch_count")]
    pub count: usize,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

fn default_prefetch_count() -> usize {
    1
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            count: default_prefetch_count(),
            preferred_language: None,
        }
    }
}

/// Completion watcher settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    #[serde(default = "default_waiter_timeout")]
    pub waiter_timeout_ms: u64,
    #[serde(default = "default_backoff_base")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub reconnect_max_ms: u64,
}

fn default_waiter_timeout() -> u64 {
    80_000
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    30_000
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            waiter_timeout_ms: default_waiter_timeout(),
            reconnect_base_ms: default_backoff_base(),
            reconnect_max_ms: default_backoff_max(),
        }
    }
}

/// Resolution deadline, polling and fallback bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_resolve_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_max_attempts() -> usize {
    3
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_secs: default_resolve_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Blocklist rules, compiled once into a [`crate::blocklist::Blocklist`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BlocklistConfig {
    #[serde(default)]
    pub rules: Vec<BlocklistRule>,
}

/// A single blocklist rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlocklistRule {
    pub pattern: String,
    #[serde(default)]
    pub kind: PatternKind,
    /// Free-form label reported when the rule matches (e.g. "cam", "spam").
    #[serde(default)]
    pub category: Option<String>,
}

/// How a blocklist pattern is interpreted.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Case-insensitive substring.
    #[default]
    Substring,
    /// Case-insensitive whole-word match.
    Word,
    /// Regular expression.
    Regex,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub indexer: SanitizedEndpoint,
    pub backend: SanitizedEndpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usenet: Option<SanitizedEndpoint>,
    pub cache: CacheConfig,
    pub triage: TriageConfig,
    pub history: HistoryConfig,
    pub prefetch: PrefetchConfig,
    pub watcher: WatcherConfig,
    pub resolver: ResolverConfig,
    pub blocklist_rules: usize,
}

/// Endpoint with its credential hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEndpoint {
    pub url: String,
    pub credentials_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            indexer: SanitizedEndpoint {
                url: config.indexer.url.clone(),
                credentials_configured: !config.indexer.api_key.is_empty(),
            },
            backend: SanitizedEndpoint {
                url: config.backend.url.clone(),
                credentials_configured: !config.backend.api_key.is_empty(),
            },
            usenet: config.usenet.as_ref().map(|u| SanitizedEndpoint {
                url: format!("nntp://{}:{}", u.host, u.port),
                credentials_configured: u.username.is_some() && u.password.is_some(),
            }),
            cache: config.cache.clone(),
            triage: config.triage.clone(),
            history: config.history.clone(),
            prefetch: config.prefetch.clone(),
            watcher: config.watcher.clone(),
            resolver: config.resolver.clone(),
            blocklist_rules: config.blocklist.rules.len(),
        }
    }
}

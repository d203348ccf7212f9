pub mod backend;
pub mod blocklist;
pub mod cache;
pub mod config;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod searcher;
pub mod testing;
pub mod triage;
pub mod watcher;

pub use backend::{BackendError, DownloadBackend, DownloadJob, JobStatus, PlayableMedia, SabnzbdBackend};
pub use blocklist::{BlockVerdict, Blocklist, BlocklistChecker, BlocklistError};
pub use cache::{
    CacheError, CacheKey, CacheStats, CacheStore, ContentKey, ContentKind, EpisodeNumber,
    InFlightOrigin, InstantCache, ResolveError, ResolvedStream,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use history::{HistoryIndex, HistoryMatch, HistoryMatcher};
pub use orchestrator::{
    BackupCandidate, JobResolver, PlaybackFailure, PlaybackRequest, ResolverDeps,
    ResolverSettings, StreamRef, StreamResolver, StreamSource,
};
pub use searcher::{Candidate, ProwlarrSearcher, SearchError, Searcher};
pub use triage::{
    HttpNzbSource, NntpProber, TriageDecision, TriageStatus, TriageVerifier, UsenetProvider,
};
pub use watcher::{CompletionWatcher, WaiterRegistry, WatcherError, WatcherHandle};

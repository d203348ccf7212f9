//! Cache tiers and the in-flight job tracker.
//!
//! [`CacheStore`] owns every piece of process-wide mutable resolution state
//! and is injected into the components that need it.

mod inflight;
mod instant;
mod negative;
mod resolution;
mod types;

pub use inflight::{InFlightInfo, InFlightOrigin, InFlightTracker};
pub use instant::{ContentKey, ContentKind, InstantCache, InstantEntry};
pub use negative::{NegativeCache, NegativeHit};
pub use resolution::ResolutionCache;
pub use types::*;

use std::time::Duration;

use crate::config::CacheConfig;

/// All cache tiers plus the in-flight tracker.
pub struct CacheStore {
    pub resolution: ResolutionCache,
    pub negative: NegativeCache,
    pub instant: InstantCache,
    pub in_flight: InFlightTracker,
}

impl CacheStore {
    pub fn new(config: &CacheConfig, instant: InstantCache) -> Self {
        Self {
            resolution: ResolutionCache::new(config),
            negative: NegativeCache::new(config.negative_ttl_secs),
            instant,
            in_flight: InFlightTracker::with_park_window(park_window(config)),
        }
    }

    /// In-memory store (useful for testing).
    pub fn in_memory(config: &CacheConfig) -> Result<Self, CacheError> {
        Ok(Self::new(config, InstantCache::in_memory(config.instant_ttl_secs)?))
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let counts = self.resolution.counts();
        let count = |status: EntryStatus| counts.get(&status).copied().unwrap_or(0);
        Ok(CacheStats {
            pending: count(EntryStatus::Pending),
            ready: count(EntryStatus::Ready),
            failed: count(EntryStatus::Failed),
            timeout_pending: count(EntryStatus::TimeoutPending),
            negative: self.negative.len(),
            instant: self.instant.len()?,
            in_flight: self.in_flight.len(),
        })
    }

    /// Drop resolution, negative and instant entries. Jobs still in flight
    /// stay tracked so a retry cannot enqueue them twice.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.resolution.clear();
        self.negative.clear();
        self.instant.clear()
    }
}

/// A parked slot lives as long as the `timeout_pending` entry it backs. A
/// zero TTL falls back to the tracker's cap.
fn park_window(config: &CacheConfig) -> Duration {
    match config.timeout_pending_ttl_secs {
        0 => Duration::MAX,
        secs => Duration::from_secs(secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_and_clear() {
        let store = CacheStore::in_memory(&CacheConfig::default()).unwrap();
        store.negative.insert("bad", "failed", "backend_failure");
        store.in_flight.try_register("live", InFlightOrigin::Prefetch);

        let stats = store.stats().unwrap();
        assert_eq!(stats.negative, 1);
        assert_eq!(stats.in_flight, 1);

        store.clear().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.negative, 0);
        assert_eq!(stats.in_flight, 1);
    }
}

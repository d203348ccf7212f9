//! Negative cache of known-bad download references.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Why a resource is known bad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegativeHit {
    pub reason: String,
    pub code: String,
}

/// Map size above which an insert sweeps out expired entries.
const PRUNE_THRESHOLD: usize = 256;

#[derive(Debug)]
struct NegativeEntry {
    hit: NegativeHit,
    /// None when the TTL cannot be represented; such entries never expire.
    expires_at: Option<Instant>,
}

impl NegativeEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Remembers failed resources for a fixed TTL.
///
/// A TTL of zero disables the cache: nothing is ever stored.
#[derive(Debug)]
pub struct NegativeCache {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, NegativeEntry>>,
}

impl NegativeCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Record a failure. Returns false when the cache is disabled.
    pub fn insert(&self, download_ref: &str, reason: &str, code: &str) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        debug!(download_ref = download_ref, code = code, "Negative-caching resource");
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.len() >= PRUNE_THRESHOLD {
            entries.retain(|_, e| e.is_live(now));
        }
        entries.insert(
            download_ref.to_string(),
            NegativeEntry {
                hit: NegativeHit {
                    reason: reason.to_string(),
                    code: code.to_string(),
                },
                expires_at: now.checked_add(ttl),
            },
        );
        true
    }

    /// The recorded failure, if present and not expired.
    pub fn get(&self, download_ref: &str) -> Option<NegativeHit> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get(download_ref) {
            Some(entry) if entry.is_live(now) => Some(entry.hit.clone()),
            Some(_) => {
                entries.remove(download_ref);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, download_ref: &str) -> bool {
        self.get(download_ref).is_some()
    }

    pub fn remove(&self, download_ref: &str) -> bool {
        self.lock().remove(download_ref).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, NegativeEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = NegativeCache::new(60);
        assert!(cache.insert("ref", "par2 repair failed", "backend_failure"));

        let hit = cache.get("ref").unwrap();
        assert_eq!(hit.code, "backend_failure");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("ref").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = NegativeCache::new(0);
        assert!(!cache.is_enabled());
        assert!(!cache.insert("ref", "failed", "backend_failure"));
        assert!(!cache.contains("ref"));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_prunes_expired_entries() {
        let cache = NegativeCache::new(60);
        for i in 0..PRUNE_THRESHOLD {
            cache.insert(&format!("old-{}", i), "failed", "backend_failure");
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        cache.insert("fresh", "failed", "backend_failure");
        assert_eq!(cache.lock().len(), 1);
        assert!(cache.contains("fresh"));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let cache = NegativeCache::new(u64::MAX);
        assert!(cache.insert("ref", "failed", "backend_failure"));
        assert!(cache.contains("ref"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = NegativeCache::new(60);
        cache.insert("a", "x", "y");
        cache.insert("b", "x", "y");
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}

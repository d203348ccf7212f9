//! Single-flight resolution cache.
//!
//! One entry per [`CacheKey`]. While an entry is pending every caller awaits
//! the same spawned attempt, so the builder runs at most once per key at a
//! time. The attempt runs on its own task: a caller going away does not
//! cancel it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::metrics;

use super::{CacheKey, EntryStatus, ResolveError, ResolvedStream};

type Outcome = Result<ResolvedStream, ResolveError>;
type SharedAttempt = Shared<BoxFuture<'static, Outcome>>;

enum Entry {
    Pending {
        attempt: SharedAttempt,
        generation: u64,
    },
    Ready {
        value: ResolvedStream,
        expires_at: Option<Instant>,
    },
    Failed {
        error: ResolveError,
        expires_at: Option<Instant>,
    },
    TimeoutPending {
        expires_at: Option<Instant>,
    },
}

impl Entry {
    fn status(&self) -> EntryStatus {
        match self {
            Entry::Pending { .. } => EntryStatus::Pending,
            Entry::Ready { .. } => EntryStatus::Ready,
            Entry::Failed { .. } => EntryStatus::Failed,
            Entry::TimeoutPending { .. } => EntryStatus::TimeoutPending,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        let expires_at = match self {
            Entry::Pending { .. } => None,
            Entry::Ready { expires_at, .. }
            | Entry::Failed { expires_at, .. }
            | Entry::TimeoutPending { expires_at } => *expires_at,
        };
        expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Clone, Copy)]
struct Ttls {
    settled: Option<Duration>,
    timeout_pending: Option<Duration>,
}

/// 0 means never expire.
fn ttl(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

type EntryMap = Arc<Mutex<HashMap<CacheKey, Entry>>>;

fn lock(entries: &EntryMap) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide resolution state, one entry per key.
pub struct ResolutionCache {
    entries: EntryMap,
    ttls: Ttls,
    generation: AtomicU64,
}

impl ResolutionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttls: Ttls {
                settled: ttl(config.resolution_ttl_secs),
                timeout_pending: ttl(config.timeout_pending_ttl_secs),
            },
            generation: AtomicU64::new(0),
        }
    }

    /// Resolve `key`, running `builder` only if no attempt is pending.
    ///
    /// - pending: await the existing attempt
    /// - ready: return the cached stream
    /// - failed: return the cached error
    /// - timeout_pending, expired or absent: start a new attempt
    ///
    /// A new attempt after a timeout relies on the builder going through the
    /// in-flight tracker, which hands back the job the earlier attempt created.
    pub async fn resolve<F, Fut>(&self, key: CacheKey, builder: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let attempt = {
            let mut entries = lock(&self.entries);
            let now = Instant::now();

            if entries.get(&key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(&key);
            }

            match entries.get(&key) {
                Some(Entry::Pending { attempt, .. }) => {
                    metrics::RESOLUTION_CACHE_EVENTS.with_label_values(&["joined"]).inc();
                    debug!(download_ref = %key.download_ref, "Joining pending resolution");
                    attempt.clone()
                }
                Some(Entry::Ready { value, .. }) => {
                    metrics::RESOLUTION_CACHE_EVENTS.with_label_values(&["hit"]).inc();
                    return Ok(value.clone());
                }
                Some(Entry::Failed { error, .. }) => {
                    metrics::RESOLUTION_CACHE_EVENTS.with_label_values(&["failed_hit"]).inc();
                    return Err(error.clone());
                }
                Some(Entry::TimeoutPending { .. }) | None => {
                    if entries.contains_key(&key) {
                        debug!(download_ref = %key.download_ref, "Retrying timed-out resolution");
                    }
                    metrics::RESOLUTION_CACHE_EVENTS.with_label_values(&["miss"]).inc();
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let attempt = self.spawn_attempt(key.clone(), generation, builder());
                    entries.insert(
                        key,
                        Entry::Pending {
                            attempt: attempt.clone(),
                            generation,
                        },
                    );
                    attempt
                }
            }
        };

        attempt.await
    }

    fn spawn_attempt<Fut>(&self, key: CacheKey, generation: u64, fut: Fut) -> SharedAttempt
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let ttls = self.ttls;
        let task_key = key.clone();
        let task_entries = Arc::clone(&entries);

        let handle = tokio::spawn(async move {
            let outcome = fut.await;
            settle(&task_entries, &task_key, generation, &outcome, ttls);
            outcome
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = Err(ResolveError::Internal(format!("resolution task failed: {}", e)));
                    settle(&entries, &key, generation, &outcome, ttls);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Current state of `key`, ignoring expired entries.
    pub fn status(&self, key: &CacheKey) -> Option<EntryStatus> {
        let entries = lock(&self.entries);
        entries
            .get(key)
            .filter(|e| !e.is_expired(Instant::now()))
            .map(Entry::status)
    }

    /// Drop every entry for a download reference, whatever its category or
    /// episode. A pending attempt keeps running but no longer updates the map.
    pub fn invalidate_ref(&self, download_ref: &str) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|k, _| k.download_ref != download_ref);
        before - entries.len()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Counts per state, expired entries excluded.
    pub fn counts(&self) -> HashMap<EntryStatus, usize> {
        let entries = lock(&self.entries);
        let now = Instant::now();
        let mut counts = HashMap::new();
        for entry in entries.values().filter(|e| !e.is_expired(now)) {
            *counts.entry(entry.status()).or_insert(0) += 1;
        }
        counts
    }
}

/// Move a pending entry to its settled state, if it still belongs to this attempt.
fn settle(entries: &EntryMap, key: &CacheKey, generation: u64, outcome: &Outcome, ttls: Ttls) {
    let mut entries = lock(entries);
    let owned = matches!(
        entries.get(key),
        Some(Entry::Pending { generation: g, .. }) if *g == generation
    );
    if !owned {
        return;
    }

    let now = Instant::now();
    // Overflowing deadlines are treated as never expiring.
    let at = |ttl: Option<Duration>| ttl.and_then(|d| now.checked_add(d));

    match outcome {
        Ok(value) => {
            entries.insert(
                key.clone(),
                Entry::Ready {
                    value: value.clone(),
                    expires_at: at(ttls.settled),
                },
            );
        }
        Err(error) if error.is_terminal() => {
            entries.insert(
                key.clone(),
                Entry::Failed {
                    error: error.clone(),
                    expires_at: at(ttls.settled),
                },
            );
        }
        Err(error) if error.is_timeout() => {
            warn!(download_ref = %key.download_ref, error = %error, "Resolution timed out, job may still finish");
            entries.insert(
                key.clone(),
                Entry::TimeoutPending {
                    expires_at: at(ttls.timeout_pending),
                },
            );
        }
        Err(_) => {
            entries.remove(key);
        }
    }
}

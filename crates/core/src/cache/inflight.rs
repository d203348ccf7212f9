//! Process-wide registry of download references with a backend job in flight.
//!
//! Every path that may create an external job (request resolution, prefetch,
//! fallback) goes through this tracker. All access is funnelled through one
//! mutex-guarded map; each reference owns a `OnceCell` so that concurrent
//! callers share the job id produced by a single enqueue.
//!
//! A slot whose resolution timed out is parked: it survives for a bounded
//! window so a retry joins the running job, and is dropped once the window
//! passes without anyone resuming it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

/// Which path registered a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightOrigin {
    Request,
    Prefetch,
    Fallback,
}

#[derive(Debug)]
struct Slot {
    origin: InFlightOrigin,
    registered_at: Instant,
    job: Arc<OnceCell<String>>,
    /// Set while no attempt is resolving this reference.
    parked_until: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.parked_until.is_none_or(|until| now < until)
    }
}

/// Point-in-time view of one tracked reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightInfo {
    pub download_ref: String,
    pub origin: InFlightOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub age_secs: u64,
}

#[derive(Debug)]
pub struct InFlightTracker {
    slots: Mutex<HashMap<String, Slot>>,
    park_window: Duration,
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::with_park_window(MAX_PARK)
    }

    /// Parked slots lapse after `window`, capped at one day.
    pub fn with_park_window(window: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            park_window: window.min(MAX_PARK),
        }
    }

    /// Every access goes through here, so lapsed parked slots are dropped
    /// before anyone can observe them.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        slots.retain(|download_ref, slot| {
            let live = slot.is_live(now);
            if !live {
                debug!(download_ref = %download_ref, "Dropped lapsed in-flight slot");
            }
            live
        });
        slots
    }

    /// Atomically claim `download_ref`. Returns false if it was already tracked.
    pub fn try_register(&self, download_ref: &str, origin: InFlightOrigin) -> bool {
        let mut slots = self.lock();
        if slots.contains_key(download_ref) {
            return false;
        }
        slots.insert(download_ref.to_string(), new_slot(origin));
        debug!(download_ref = download_ref, origin = ?origin, "Registered in-flight");
        true
    }

    /// The backend job for `download_ref`, running `enqueue` only if no job
    /// exists yet. Concurrent callers wait for the same enqueue. A failed
    /// enqueue leaves no job behind and frees the slot.
    pub async fn job_for<F, Fut, E>(
        &self,
        download_ref: &str,
        origin: InFlightOrigin,
        enqueue: F,
    ) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let cell = {
            let mut slots = self.lock();
            let slot = slots
                .entry(download_ref.to_string())
                .or_insert_with(|| new_slot(origin));
            slot.parked_until = None;
            Arc::clone(&slot.job)
        };

        match cell.get_or_try_init(enqueue).await {
            Ok(job_id) => Ok(job_id.clone()),
            Err(e) => {
                let mut slots = self.lock();
                let stale = slots
                    .get(download_ref)
                    .is_some_and(|s| Arc::ptr_eq(&s.job, &cell) && !s.job.initialized());
                if stale {
                    slots.remove(download_ref);
                }
                Err(e)
            }
        }
    }

    /// Job id already assigned to `download_ref`, if any.
    pub fn job_id(&self, download_ref: &str) -> Option<String> {
        self.lock()
            .get(download_ref)
            .and_then(|s| s.job.get().cloned())
    }

    pub fn contains(&self, download_ref: &str) -> bool {
        self.lock().contains_key(download_ref)
    }

    /// Keep `download_ref` tracked for at most the park window with no
    /// attempt resolving it. Resuming through [`InFlightTracker::job_for`]
    /// unparks it.
    pub fn park(&self, download_ref: &str) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(download_ref) {
            slot.parked_until = Instant::now().checked_add(self.park_window);
            debug!(
                download_ref = download_ref,
                window_secs = self.park_window.as_secs(),
                "Parked in-flight"
            );
        }
    }

    /// Stop tracking `download_ref`.
    pub fn release(&self, download_ref: &str) -> bool {
        let removed = self.lock().remove(download_ref).is_some();
        if removed {
            debug!(download_ref = download_ref, "Released in-flight");
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<InFlightInfo> {
        let now = Instant::now();
        let mut items: Vec<InFlightInfo> = self
            .lock()
            .iter()
            .map(|(download_ref, slot)| InFlightInfo {
                download_ref: download_ref.clone(),
                origin: slot.origin,
                job_id: slot.job.get().cloned(),
                age_secs: now.saturating_duration_since(slot.registered_at).as_secs(),
            })
            .collect();
        items.sort_by(|a, b| a.download_ref.cmp(&b.download_ref));
        items
    }
}

const MAX_PARK: Duration = Duration::from_secs(24 * 3600);

fn new_slot(origin: InFlightOrigin) -> Slot {
    Slot {
        origin,
        registered_at: Instant::now(),
        job: Arc::new(OnceCell::new()),
        parked_until: None,
    }
}

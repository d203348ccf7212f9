//! Per-job completion waiters with hard deadlines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::JobStatus;

use super::{JobEvent, WatcherError};

type WaitResult = Result<(), WatcherError>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<WaitResult>,
    timer: JoinHandle<()>,
}

type WaiterMap = Arc<Mutex<HashMap<String, Vec<Waiter>>>>;

fn lock(waiters: &WaiterMap) -> MutexGuard<'_, HashMap<String, Vec<Waiter>>> {
    waiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pending wait for one job.
#[derive(Debug)]
pub struct WaitHandle {
    pub job_id: String,
    pub waiter_id: u64,
    rx: oneshot::Receiver<WaitResult>,
}

impl WaitHandle {
    /// Resolves on completion, failure, deadline, or cancellation.
    pub async fn wait(self) -> WaitResult {
        self.rx.await.unwrap_or(Err(WatcherError::Cancelled))
    }
}

/// Map of job id to waiters.
pub struct WaiterRegistry {
    waiters: WaiterMap,
    next_id: AtomicU64,
    timeout: Duration,
}

impl WaiterRegistry {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            waiters: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Start waiting for `job_id`. The waiter rejects with
    /// [`WatcherError::Timeout`] once the deadline passes without an event.
    pub fn register(&self, job_id: &str) -> WaitHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let waiters = Arc::clone(&self.waiters);
        let timeout = self.timeout;
        let timer_job = job_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(waiter) = take(&waiters, &timer_job, id) {
                debug!(job_id = %timer_job, "Completion waiter timed out");
                let _ = waiter.tx.send(Err(WatcherError::Timeout {
                    job_id: timer_job,
                    after_ms: timeout.as_millis() as u64,
                }));
            }
        });

        lock(&self.waiters)
            .entry(job_id.to_string())
            .or_default()
            .push(Waiter { id, tx, timer });

        WaitHandle {
            job_id: job_id.to_string(),
            waiter_id: id,
            rx,
        }
    }

    /// Apply an event. Completed resolves and failed rejects every waiter
    /// of the job; any other status leaves them pending. Returns the number
    /// of waiters settled.
    pub fn handle_event(&self, event: &JobEvent) -> usize {
        let outcome = match event.status {
            JobStatus::Completed => Ok(()),
            JobStatus::Failed => Err(WatcherError::JobFailed {
                job_id: event.job_id.clone(),
                message: event
                    .fail_message
                    .clone()
                    .unwrap_or_else(|| "download failed".to_string()),
            }),
            _ => return 0,
        };

        let settled = lock(&self.waiters).remove(&event.job_id).unwrap_or_default();
        let count = settled.len();
        for waiter in settled {
            waiter.timer.abort();
            let _ = waiter.tx.send(outcome.clone());
        }
        if count > 0 {
            debug!(job_id = %event.job_id, status = event.status.as_str(), waiters = count, "Settled waiters");
        }
        count
    }

    /// Drop a waiter that another path already settled. Clears its timer.
    pub fn cancel(&self, job_id: &str, waiter_id: u64) -> bool {
        match take(&self.waiters, job_id, waiter_id) {
            Some(waiter) => {
                waiter.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Number of live waiters across all jobs.
    pub fn len(&self) -> usize {
        lock(&self.waiters).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn take(waiters: &WaiterMap, job_id: &str, waiter_id: u64) -> Option<Waiter> {
    let mut map = lock(waiters);
    let list = map.get_mut(job_id)?;
    let pos = list.iter().position(|w| w.id == waiter_id)?;
    let waiter = list.swap_remove(pos);
    if list.is_empty() {
        map.remove(job_id);
    }
    Some(waiter)
}

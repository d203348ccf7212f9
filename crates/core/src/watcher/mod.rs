//! Completion watcher: push notifications of backend job state changes.
//!
//! A single long-lived connection receives events and settles per-job
//! waiters registered in a [`WaiterRegistry`]. Every waiter has a hard
//! deadline so a dead connection never stalls a resolution.

mod backoff;
mod registry;
mod session;
mod stream;

pub use backoff::ReconnectBackoff;
pub use registry::{WaitHandle, WaiterRegistry};
pub use session::{parse_frame, EventStreamSession, JobEvent, SessionState};
pub use stream::{CompletionWatcher, WatcherHandle};

use thiserror::Error;

/// Errors a waiter can settle with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatcherError {
    #[error("no completion event for job {job_id} within {after_ms}ms")]
    Timeout { job_id: String, after_ms: u64 },

    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("waiter cancelled")]
    Cancelled,

    #[error("malformed frame: {0}")]
    Protocol(String),
}

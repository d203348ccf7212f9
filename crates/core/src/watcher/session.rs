//! Event-stream authentication state and frame decoding.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::JobStatus;

use super::WatcherError;

/// A job status change pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub fail_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "job_id", alias = "nzo_id", alias = "jobId")]
    job_id: String,
    status: String,
    #[serde(default, alias = "failMessage")]
    fail_message: Option<String>,
}

/// Decode one inbound text frame.
pub fn parse_frame(text: &str) -> Result<JobEvent, WatcherError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| WatcherError::Protocol(e.to_string()))?;
    let fail_message = raw.fail_message.filter(|m| !m.trim().is_empty());
    Ok(JobEvent {
        job_id: raw.job_id,
        status: JobStatus::from_backend(&raw.status),
        fail_message,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// One connection's lifecycle. The server never acknowledges the token;
/// the first inbound frame of any kind is taken as proof it was accepted.
#[derive(Debug)]
pub struct EventStreamSession {
    state: SessionState,
}

impl Default for EventStreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle an inbound text frame. Malformed frames are logged and skipped.
    pub fn on_text(&mut self, text: &str) -> Option<JobEvent> {
        self.mark_seen();
        match parse_frame(text) {
            Ok(event) => {
                debug!(job_id = %event.job_id, status = event.status.as_str(), "Job event");
                Some(event)
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed event frame");
                None
            }
        }
    }

    /// Handle a non-text inbound frame (ping, binary).
    pub fn on_other(&mut self) {
        self.mark_seen();
    }

    fn mark_seen(&mut self) {
        if self.state == SessionState::Unauthenticated {
            info!("Event stream authenticated");
            self.state = SessionState::Authenticated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_accepts_aliases() {
        let a = parse_frame(r#"{"nzo_id":"SABnzbd_nzo_1","status":"Completed"}"#).unwrap();
        assert_eq!(a.job_id, "SABnzbd_nzo_1");
        assert_eq!(a.status, JobStatus::Completed);

        let b = parse_frame(r#"{"jobId":"x","status":"Failed","failMessage":"CRC error"}"#)
            .unwrap();
        assert_eq!(b.status, JobStatus::Failed);
        assert_eq!(b.fail_message.as_deref(), Some("CRC error"));

        let c = parse_frame(r#"{"job_id":"y","status":"Downloading","fail_message":""}"#)
            .unwrap();
        assert_eq!(c.status, JobStatus::Downloading);
        assert!(c.fail_message.is_none());
    }

    #[test]
    fn test_parse_frame_rejects_garbage() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"status":"Completed"}"#).is_err());
    }

    #[test]
    fn test_first_frame_authenticates() {
        let mut session = EventStreamSession::new();
        assert_eq!(session.state(), SessionState::Unauthenticated);

        assert!(session.on_text("garbage").is_none());
        assert_eq!(session.state(), SessionState::Authenticated);

        let event = session.on_text(r#"{"nzo_id":"a","status":"Completed"}"#);
        assert_eq!(event.map(|e| e.job_id), Some("a".to_string()));
    }

    #[test]
    fn test_ping_authenticates() {
        let mut session = EventStreamSession::new();
        session.on_other();
        assert_eq!(session.state(), SessionState::Authenticated);
    }
}

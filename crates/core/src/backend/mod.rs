//! Download backend abstraction.
//!
//! This module provides a `DownloadBackend` trait for submitting NZBs to an
//! external downloader and locating the playable file of a finished job.

mod sabnzbd;
mod types;

pub use sabnzbd::SabnzbdBackend;
pub use types::*;

//! Availability triage.
//!
//! Fetches a candidate's NZB, samples article message ids and asks a Usenet
//! provider whether they are still retrievable, before any download job is
//! committed.

mod nntp;
mod nzb;
mod source;
mod types;
mod verifier;

pub use nntp::NntpProber;
pub use nzb::{parse_nzb, FileKind, NzbDocument, NzbFile};
pub use source::HttpNzbSource;
pub use types::*;
pub use verifier::{TriageReport, TriageVerifier};

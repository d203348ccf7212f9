//! Release search abstraction.
//!
//! This module provides a `Searcher` trait for querying an indexer manager
//! and the aggregator that turns raw hits into ordered, deduplicated
//! candidates.

mod dedup;
mod prowlarr;
mod types;

pub use dedup::{aggregate_hits, search_all};
pub use prowlarr::ProwlarrSearcher;
pub use types::*;

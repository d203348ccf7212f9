//! Release title parsing and completed-history matching.

mod matcher;
mod parser;

pub use matcher::{
    is_subset, similarity, HistoryEntry, HistoryIndex, HistoryMatch, HistoryMatcher, YEAR_BONUS,
    YEAR_PENALTY,
};
pub use parser::{normalize_title, parse_release, ParsedRelease};

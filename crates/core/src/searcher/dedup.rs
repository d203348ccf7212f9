//! Aggregation of raw indexer hits into ordered, deduplicated candidates.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::blocklist::BlocklistChecker;
use crate::history::{normalize_title, parse_release};
use crate::metrics;

use super::{Candidate, RawHit, SearchError, SearchQuery, Searcher};

/// Deduplicate raw hits by normalized title + size.
///
/// On collision the hit from the higher-priority source (lower priority
/// value) is kept; equal priorities keep the first hit seen. Every candidate
/// is checked against the blocklist and tagged, never dropped.
///
/// The final list is ordered by parsed resolution rank, then size, both
/// descending.
pub fn aggregate_hits(raw: Vec<RawHit>, blocklist: &dyn BlocklistChecker) -> Vec<Candidate> {
    let mut order: Vec<(String, u64)> = Vec::new();
    let mut by_key: HashMap<(String, u64), RawHit> = HashMap::new();

    for hit in raw {
        let key = (normalize_title(&hit.title), hit.size_bytes);
        match by_key.get_mut(&key) {
            Some(existing) => {
                if hit.priority < existing.priority {
                    debug!(
                        title = %hit.title,
                        kept = %hit.indexer_name,
                        dropped = %existing.indexer_name,
                        "Duplicate hit replaced by higher-priority source"
                    );
                    *existing = hit;
                }
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, hit);
            }
        }
    }

    let mut ranked: Vec<(u8, Candidate)> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .map(|hit| {
            let parsed = parse_release(&hit.title);
            let verdict = blocklist.check(&hit.title);
            let rank = parsed.resolution_rank();
            let candidate = Candidate {
                title: hit.title,
                download_ref: hit.download_ref,
                indexer_id: hit.indexer_id,
                indexer_name: hit.indexer_name,
                size_bytes: hit.size_bytes,
                languages: parsed.languages,
                resolution: parsed.resolution,
                blocked: verdict.blocked.then_some(verdict),
                status: None,
            };
            (rank, candidate)
        })
        .collect();

    ranked.sort_by(|(rank_a, a), (rank_b, b)| {
        rank_b
            .cmp(rank_a)
            .then_with(|| b.size_bytes.cmp(&a.size_bytes))
    });
    ranked.into_iter().map(|(_, c)| c).collect()
}

/// Run several queries concurrently and aggregate every hit.
///
/// Individual query failures are logged and skipped; an error is returned
/// only when every query failed. An auth rejection is surfaced immediately.
pub async fn search_all(
    searcher: &dyn Searcher,
    queries: &[SearchQuery],
    blocklist: &dyn BlocklistChecker,
) -> Result<Vec<Candidate>, SearchError> {
    let results = join_all(queries.iter().map(|q| searcher.search(q))).await;

    let mut raw = Vec::new();
    let mut errors = Vec::new();
    for (query, result) in queries.iter().zip(results) {
        match result {
            Ok(mut hits) => raw.append(&mut hits),
            Err(SearchError::Unauthorized) => return Err(SearchError::Unauthorized),
            Err(e) => {
                warn!(searcher = searcher.name(), query = %query.query, error = %e, "Query failed");
                errors.push(e.to_string());
            }
        }
    }

    if raw.is_empty() && !errors.is_empty() && errors.len() == queries.len() {
        return Err(SearchError::AllQueriesFailed(errors.join("; ")));
    }

    let candidates = aggregate_hits(raw, blocklist);
    metrics::SEARCH_CANDIDATES
        .with_label_values(&[])
        .observe(candidates.len() as f64);
    Ok(candidates)
}

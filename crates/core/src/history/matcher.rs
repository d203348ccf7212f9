//! Fuzzy matching of release titles against completed download history.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::backend::{DownloadJob, JobStatus};
use crate::config::HistoryConfig;

use super::parser::{normalize_title, parse_release, ParsedRelease};

/// Added when both sides carry the same year.
pub const YEAR_BONUS: f32 = 0.1;
/// Subtracted when both sides carry a year and they differ.
pub const YEAR_PENALTY: f32 = 0.2;

/// A completed job as seen by the matcher.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub job_id: String,
    pub name: String,
    pub category: String,
    pub normalized: String,
    pub parsed: ParsedRelease,
}

/// Snapshot of recently completed jobs, rebuilt for each lookup.
#[derive(Debug, Clone, Default)]
pub struct HistoryIndex {
    entries: Vec<HistoryEntry>,
}

impl HistoryIndex {
    /// Build an index from backend history. Jobs that did not complete are skipped.
    pub fn from_jobs(jobs: &[DownloadJob]) -> Self {
        let entries = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .map(|j| HistoryEntry {
                job_id: j.job_id.clone(),
                name: j.name.clone(),
                category: j.category.clone(),
                normalized: normalize_title(&j.name),
                parsed: parse_release(&j.name),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn exact(&self, normalized: &str) -> impl Iterator<Item = &HistoryEntry> {
        let normalized = normalized.to_string();
        self.entries.iter().filter(move |e| e.normalized == normalized)
    }
}

/// A history entry that matched a release title.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryMatch {
    pub job_id: String,
    pub name: String,
    pub score: f32,
    /// One title's words are a subset of the other's.
    pub subset: bool,
    /// Normalized titles are identical.
    pub exact: bool,
}

/// Title similarity in [0, 1]: Jaccard over title words, adjusted by year.
pub fn similarity(a: &ParsedRelease, b: &ParsedRelease) -> f32 {
    let wa: HashSet<&str> = a.title_words.iter().map(String::as_str).collect();
    let wb: HashSet<&str> = b.title_words.iter().map(String::as_str).collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }

    let intersection = wa.intersection(&wb).count() as f32;
    let union = wa.union(&wb).count() as f32;
    let mut score = intersection / union;

    if let (Some(ya), Some(yb)) = (a.year, b.year) {
        if ya == yb {
            score += YEAR_BONUS;
        } else {
            score -= YEAR_PENALTY;
        }
    }

    score.clamp(0.0, 1.0)
}

/// True when every title word of one side appears in the other.
pub fn is_subset(a: &ParsedRelease, b: &ParsedRelease) -> bool {
    let wa: HashSet<&str> = a.title_words.iter().map(String::as_str).collect();
    let wb: HashSet<&str> = b.title_words.iter().map(String::as_str).collect();
    if wa.is_empty() || wb.is_empty() {
        return false;
    }
    wa.is_subset(&wb) || wb.is_subset(&wa)
}

fn episodes_conflict(a: &ParsedRelease, b: &ParsedRelease) -> bool {
    match (a.season, a.episode, b.season, b.episode) {
        (Some(sa), Some(ea), Some(sb), Some(eb)) => sa != sb || ea != eb,
        _ => false,
    }
}

/// Matches releases against a [`HistoryIndex`].
#[derive(Debug, Clone)]
pub struct HistoryMatcher {
    min_similarity: f32,
    strict: bool,
}

impl HistoryMatcher {
    pub fn new(min_similarity: f32, strict: bool) -> Self {
        Self {
            min_similarity,
            strict,
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::new(config.min_similarity, config.strict)
    }

    /// All history entries matching `title`, best score first.
    ///
    /// An entry matches when its score reaches the threshold (inclusive) or
    /// its title words are in a subset relation with the target's. Strict
    /// mode accepts subset matches only. Entries for a different episode
    /// never match.
    pub fn find_matches(&self, title: &str, index: &HistoryIndex) -> Vec<HistoryMatch> {
        let target = parse_release(title);
        let normalized = normalize_title(title);

        let mut matches: Vec<HistoryMatch> = index
            .entries()
            .iter()
            .filter(|entry| !episodes_conflict(&target, &entry.parsed))
            .filter_map(|entry| {
                let score = similarity(&target, &entry.parsed);
                let subset = is_subset(&target, &entry.parsed);
                let accepted = if self.strict {
                    subset
                } else {
                    subset || score >= self.min_similarity
                };
                accepted.then(|| HistoryMatch {
                    job_id: entry.job_id.clone(),
                    name: entry.name.clone(),
                    score,
                    subset,
                    exact: entry.normalized == normalized,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches
    }

    /// Match a batch of titles, one history job per title at most.
    ///
    /// Exact normalized-title matches are reserved for their titles first, so
    /// a fuzzy match for an earlier title can never claim a job that an
    /// exact match later in the batch owns. Each job is claimed at most once.
    pub fn match_batch(&self, titles: &[String], index: &HistoryIndex) -> Vec<Option<HistoryMatch>> {
        let mut results: Vec<Option<HistoryMatch>> = vec![None; titles.len()];
        let mut claimed: HashSet<String> = HashSet::new();

        for (idx, title) in titles.iter().enumerate() {
            let normalized = normalize_title(title);
            if let Some(entry) = index.exact(&normalized).find(|e| !claimed.contains(&e.job_id)) {
                claimed.insert(entry.job_id.clone());
                results[idx] = Some(HistoryMatch {
                    job_id: entry.job_id.clone(),
                    name: entry.name.clone(),
                    score: 1.0,
                    subset: true,
                    exact: true,
                });
            }
        }

        for (idx, title) in titles.iter().enumerate() {
            if results[idx].is_some() {
                continue;
            }
            let found = self
                .find_matches(title, index)
                .into_iter()
                .find(|m| !claimed.contains(&m.job_id));
            if let Some(m) = found {
                debug!(title = %title, job_id = %m.job_id, score = m.score, "Fuzzy history match");
                claimed.insert(m.job_id.clone());
                results[idx] = Some(m);
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, name: &str) -> DownloadJob {
        DownloadJob {
            job_id: id.to_string(),
            name: name.to_string(),
            category: "tv".to_string(),
            status: JobStatus::Completed,
            fail_message: None,
            storage: None,
        }
    }

    fn index(jobs: &[(&str, &str)]) -> HistoryIndex {
        let jobs: Vec<_> = jobs.iter().map(|(id, name)| job(id, name)).collect();
        HistoryIndex::from_jobs(&jobs)
    }

    #[test]
    fn test_index_skips_unfinished_jobs() {
        let mut failed = job("b", "Other.Movie.2020");
        failed.status = JobStatus::Failed;
        let idx = HistoryIndex::from_jobs(&[job("a", "Movie.2020"), failed]);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.entries()[0].job_id, "a");
    }

    #[test]
    fn test_similarity_year_adjustments() {
        let a = parse_release("Alpha.Beta.Gamma.2020.1080p");
        let same_year = parse_release("Alpha.Beta.Delta.2020.720p");
        let other_year = parse_release("Alpha.Beta.Delta.2019.720p");
        let no_year = parse_release("Alpha.Beta.Delta.720p");

        assert!((similarity(&a, &no_year) - 0.5).abs() < 1e-6);
        assert!((similarity(&a, &same_year) - 0.6).abs() < 1e-6);
        assert!((similarity(&a, &other_year) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_is_clamped() {
        let a = parse_release("Movie.2020.1080p");
        let b = parse_release("Movie.2020.720p");
        assert_eq!(similarity(&a, &b), 1.0);

        let c = parse_release("Other.2019.720p");
        assert_eq!(similarity(&a, &c), 0.0);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        // {alpha, beta, gamma} vs {alpha, beta, delta}: 2/4, neither a subset.
        let idx = index(&[("job", "Alpha.Beta.Delta.720p")]);
        let target = "Alpha.Beta.Gamma.1080p";

        let at = HistoryMatcher::new(0.5, false).find_matches(target, &idx);
        assert_eq!(at.len(), 1);
        assert!(!at[0].subset);

        let above = HistoryMatcher::new(0.5001, false).find_matches(target, &idx);
        assert!(above.is_empty());
    }

    #[test]
    fn test_scenario_shared_show_word() {
        let idx = index(&[("job-1", "show s01e01 dvdrip")]);
        let matches =
            HistoryMatcher::new(0.6, false).find_matches("Show.S01E01.1080p.WEB.x264-GROUP", &idx);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].job_id, "job-1");
        assert_eq!(matches[0].score, 1.0);
        assert!(!matches[0].exact);
    }

    #[test]
    fn test_low_overlap_does_not_match() {
        let idx = index(&[("job-1", "show other words here s01e01 dvdrip")]);
        let matcher = HistoryMatcher::new(0.6, false);
        let matches = matcher.find_matches("Show.Another.S01E01.1080p", &idx);
        // {show, another} vs {show, other, words, here}: 1/5
        assert!(matches.is_empty());
    }

    #[test]
    fn test_subset_matches_below_threshold() {
        let idx = index(&[("job-1", "Movie.Title.Director.Cut.Words.2020.1080p")]);
        let matches = HistoryMatcher::new(0.9, false).find_matches("Movie.Title.2020.720p", &idx);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].subset);
    }

    #[test]
    fn test_strict_mode_requires_subset() {
        let idx = index(&[("job", "Alpha.Beta.Delta.720p")]);
        let strict = HistoryMatcher::new(0.1, true);
        assert!(strict.find_matches("Alpha.Beta.Gamma.1080p", &idx).is_empty());
        assert_eq!(strict.find_matches("Alpha.Beta.1080p", &idx).len(), 1);
    }

    #[test]
    fn test_episode_guard() {
        let idx = index(&[("e1", "Show.S01E01.720p"), ("e2", "Show.S01E02.720p")]);
        let matches = HistoryMatcher::new(0.6, false).find_matches("Show.S01E02.1080p", &idx);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].job_id, "e2");
    }

    #[test]
    fn test_matches_sorted_by_score() {
        let idx = index(&[
            ("partial", "Alpha.Beta.Delta.720p"),
            ("full", "Alpha.Beta.Gamma.720p"),
        ]);
        let matches = HistoryMatcher::new(0.5, false).find_matches("Alpha.Beta.Gamma.1080p", &idx);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].job_id, "full");
        assert_eq!(matches[1].job_id, "partial");
    }

    #[test]
    fn test_batch_reserves_exact_matches_first() {
        // Job A is an exact match for the second title; the first title is
        // only fuzzy-similar to A and is iterated first.
        let idx = index(&[("A", "Movie.Title.2020.1080p.WEB-GRP")]);
        let titles = vec![
            "Movie.Title.2020.720p.HDTV-OTHER".to_string(),
            "Movie.Title.2020.1080p.WEB-GRP".to_string(),
        ];

        let results = HistoryMatcher::new(0.6, false).match_batch(&titles, &idx);

        assert!(results[0].is_none());
        let exact = results[1].as_ref().unwrap();
        assert_eq!(exact.job_id, "A");
        assert!(exact.exact);
    }

    #[test]
    fn test_batch_fuzzy_claims_are_exclusive() {
        let idx = index(&[("A", "Movie.Title.2020.1080p")]);
        let titles = vec![
            "Movie.Title.2020.720p".to_string(),
            "Movie.Title.2020.2160p".to_string(),
        ];
        let results = HistoryMatcher::new(0.6, false).match_batch(&titles, &idx);
        assert_eq!(results[0].as_ref().map(|m| m.job_id.as_str()), Some("A"));
        assert!(results[1].is_none());
    }
}

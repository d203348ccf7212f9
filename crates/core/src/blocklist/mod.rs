//! Release blocklist.
//!
//! Rules are compiled once at configuration load into a small tagged matcher;
//! checks never re-parse patterns.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BlocklistRule, PatternKind};

#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("Invalid blocklist pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Outcome of a blocklist check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVerdict {
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl BlockVerdict {
    pub fn allowed() -> Self {
        Self::default()
    }
}

/// Anything that can decide whether a release title is blocked.
pub trait BlocklistChecker: Send + Sync {
    fn check(&self, title: &str) -> BlockVerdict;
}

#[derive(Debug)]
enum Matcher {
    Substring(String),
    Word(Regex),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, title: &str, lowered: &str) -> bool {
        match self {
            Matcher::Substring(needle) => lowered.contains(needle.as_str()),
            Matcher::Word(re) | Matcher::Regex(re) => re.is_match(title),
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    matcher: Matcher,
    source: String,
    category: Option<String>,
}

/// Compiled blocklist.
#[derive(Debug, Default)]
pub struct Blocklist {
    rules: Vec<CompiledRule>,
}

impl Blocklist {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile rules. Fails on the first rule whose pattern does not parse.
    pub fn from_rules(rules: &[BlocklistRule]) -> Result<Self, BlocklistError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let invalid = |reason: String| BlocklistError::InvalidPattern {
                pattern: rule.pattern.clone(),
                reason,
            };
            if rule.pattern.trim().is_empty() {
                return Err(invalid("empty pattern".to_string()));
            }
            let matcher = match rule.kind {
                PatternKind::Substring => Matcher::Substring(rule.pattern.to_lowercase()),
                PatternKind::Word => {
                    let expr = format!(r"(?i)\b{}\b", regex_lite::escape(rule.pattern.trim()));
                    Matcher::Word(Regex::new(&expr).map_err(|e| invalid(e.to_string()))?)
                }
                PatternKind::Regex => Matcher::Regex(
                    Regex::new(&rule.pattern).map_err(|e| invalid(e.to_string()))?,
                ),
            };
            compiled.push(CompiledRule {
                matcher,
                source: rule.pattern.clone(),
                category: rule.category.clone(),
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl BlocklistChecker for Blocklist {
    fn check(&self, title: &str) -> BlockVerdict {
        let lowered = title.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(title, &lowered))
            .map(|rule| BlockVerdict {
                blocked: true,
                category: rule.category.clone(),
                pattern: Some(rule.source.clone()),
            })
            .unwrap_or_default()
    }
}

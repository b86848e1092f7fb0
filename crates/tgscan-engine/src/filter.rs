//! Relevance evaluation of message text against compiled criteria.
//!
//! Evaluation is a pure function of `(text, &Criteria)`. Reloading criteria
//! swaps an `Arc` in a [`CriteriaHandle`]; evaluations already holding the
//! previous `Arc` finish against it unchanged.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use regex::{Regex, RegexBuilder};

use tgscan_core::{AndPolicy, LogicOperator, MatchResult, Message, RelevanceSettings};

use crate::error::ScanError;

#[derive(Debug, Clone)]
struct Keyword {
    literal: String,
    folded: String,
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

/// Compiled, immutable relevance criteria.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    keywords: Vec<Keyword>,
    patterns: Vec<Pattern>,
    logic: LogicOperator,
    and_policy: AndPolicy,
}

impl Criteria {
    /// Compiles `settings`. Blank keywords are dropped; duplicate keywords
    /// (case-insensitively) and duplicate pattern sources keep their first
    /// occurrence. Patterns match case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidPattern`] for the first pattern that does
    /// not compile.
    pub fn compile(settings: &RelevanceSettings) -> Result<Self, ScanError> {
        let mut seen = HashSet::new();
        let keywords = settings
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .filter_map(|k| {
                let folded = k.to_lowercase();
                seen.insert(folded.clone()).then(|| Keyword {
                    literal: k.to_owned(),
                    folded,
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut patterns = Vec::new();
        for source in &settings.regex_patterns {
            if !seen.insert(source.as_str()) {
                continue;
            }
            let regex = RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .map_err(|e| ScanError::InvalidPattern {
                    pattern: source.clone(),
                    source: e,
                })?;
            patterns.push(Pattern {
                source: source.clone(),
                regex,
            });
        }

        Ok(Self {
            keywords,
            patterns,
            logic: settings.logic,
            and_policy: settings.and_policy,
        })
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.keywords.len() + self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    #[must_use]
    pub fn logic(&self) -> LogicOperator {
        self.logic
    }
}

/// Relevance outcome for a bare piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub is_relevant: bool,
    pub score: f64,
    pub matched_terms: Vec<String>,
}

/// Evaluates `text` against `criteria`.
///
/// Keywords are case-insensitive substring tests; patterns are searched, not
/// full-matched. Under `OR` any hit is relevant. Under `AND` the outcome
/// depends on the criteria's [`AndPolicy`]. Empty criteria match nothing.
#[must_use]
pub fn evaluate_text(text: &str, criteria: &Criteria) -> Verdict {
    let folded = text.to_lowercase();

    let keyword_hits: Vec<&str> = criteria
        .keywords
        .iter()
        .filter(|k| folded.contains(&k.folded))
        .map(|k| k.literal.as_str())
        .collect();
    let pattern_hits: Vec<&str> = criteria
        .patterns
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| p.source.as_str())
        .collect();

    let matched = keyword_hits.len() + pattern_hits.len();
    let total = criteria.total();

    let is_relevant = match criteria.logic {
        _ if total == 0 => false,
        LogicOperator::Or => matched > 0,
        LogicOperator::And => match criteria.and_policy {
            AndPolicy::AnyPerKind => {
                let keywords_ok = criteria.keywords.is_empty() || !keyword_hits.is_empty();
                let patterns_ok = criteria.patterns.is_empty() || !pattern_hits.is_empty();
                keywords_ok && patterns_ok
            }
            AndPolicy::AllTerms => matched == total,
        },
    };

    #[allow(clippy::cast_precision_loss)]
    let score = (matched as f64 / total.max(1) as f64).clamp(0.0, 1.0);

    Verdict {
        is_relevant,
        score,
        matched_terms: keyword_hits
            .into_iter()
            .chain(pattern_hits)
            .map(str::to_owned)
            .collect(),
    }
}

/// Evaluates a message's searchable text and wraps the outcome.
#[must_use]
pub fn evaluate(message: Message, criteria: &Criteria) -> MatchResult {
    let verdict = evaluate_text(&message.searchable_text(), criteria);
    MatchResult {
        message,
        is_relevant: verdict.is_relevant,
        score: verdict.score,
        matched_terms: verdict.matched_terms,
    }
}

/// Shared, swappable reference to the current criteria.
#[derive(Debug, Clone, Default)]
pub struct CriteriaHandle {
    inner: Arc<RwLock<Arc<Criteria>>>,
}

impl CriteriaHandle {
    #[must_use]
    pub fn new(criteria: Criteria) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(criteria))),
        }
    }

    /// Snapshot of the criteria in force right now.
    #[must_use]
    pub fn current(&self) -> Arc<Criteria> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, criteria: Criteria) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(criteria);
    }
}

#[cfg(test)]
#[path = "filter_test.rs"]
mod tests;

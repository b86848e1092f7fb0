use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How keyword and pattern hits combine into a relevance verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOperator {
    And,
    #[default]
    Or,
}

impl FromStr for LogicOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(LogicOperator::And),
            "OR" => Ok(LogicOperator::Or),
            other => Err(format!("expected AND or OR, got \"{other}\"")),
        }
    }
}

impl std::fmt::Display for LogicOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicOperator::And => write!(f, "AND"),
            LogicOperator::Or => write!(f, "OR"),
        }
    }
}

/// What `AND` requires of the configured criteria.
///
/// - `AnyPerKind`: at least one keyword hit and at least one pattern hit. A
///   kind with nothing configured is not required.
/// - `AllTerms`: every declared keyword and every declared pattern must hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AndPolicy {
    #[default]
    AnyPerKind,
    AllTerms,
}

impl FromStr for AndPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any_per_kind" => Ok(AndPolicy::AnyPerKind),
            "all_terms" => Ok(AndPolicy::AllTerms),
            other => Err(format!(
                "expected any_per_kind or all_terms, got \"{other}\""
            )),
        }
    }
}

/// Uncompiled relevance criteria as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelevanceSettings {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub regex_patterns: Vec<String>,
    #[serde(default)]
    pub logic: LogicOperator,
    #[serde(default)]
    pub and_policy: AndPolicy,
}

impl RelevanceSettings {
    /// Total number of declared criteria (keywords plus patterns).
    #[must_use]
    pub fn criteria_count(&self) -> usize {
        self.keywords.len() + self.regex_patterns.len()
    }
}

/// Load relevance criteria from a YAML file.
///
/// Every pattern is test-compiled so a typo fails at startup rather than
/// silently never matching.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or contains an
/// invalid regular expression.
pub fn load_criteria(path: &Path) -> Result<RelevanceSettings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::CriteriaFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let settings: RelevanceSettings =
        serde_yaml::from_str(&content).map_err(ConfigError::CriteriaFileParse)?;

    validate_criteria(&settings)?;

    Ok(settings)
}

/// Validate relevance criteria: keywords must be non-blank and patterns must
/// compile.
///
/// # Errors
///
/// Returns `ConfigError::InvalidCriteria` describing the first problem found.
pub fn validate_criteria(settings: &RelevanceSettings) -> Result<(), ConfigError> {
    if let Some(idx) = settings.keywords.iter().position(|k| k.trim().is_empty()) {
        return Err(ConfigError::InvalidCriteria(format!(
            "keyword #{idx} is blank"
        )));
    }

    for pattern in &settings.regex_patterns {
        regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidCriteria(format!("pattern \"{pattern}\": {e}")))?;
    }

    Ok(())
}

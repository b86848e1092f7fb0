//! Shared domain types and configuration for the group scanner.

pub mod app_config;
pub mod config;
pub mod criteria;
pub mod models;

use thiserror::Error;

pub use app_config::ScannerConfig;
pub use config::{load_scanner_config, load_scanner_config_from_env};
pub use criteria::{load_criteria, validate_criteria, AndPolicy, LogicOperator, RelevanceSettings};
pub use models::{Group, MatchResult, MediaKind, Message, ScannerState};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read criteria file {path}: {source}")]
    CriteriaFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse criteria file: {0}")]
    CriteriaFileParse(#[from] serde_yaml::Error),

    #[error("invalid relevance criteria: {0}")]
    InvalidCriteria(String),
}

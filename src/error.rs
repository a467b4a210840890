//! Error types.

use thiserror::Error;

/// Errors that fail a whole analysis request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("invalid request: {0}")]
    InvalidInput(String),
}

/// Errors raised inside a single detector.
///
/// These never leave the analyzer: the detector invocation boundary turns
/// them into a finding of the failing detector's category.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to parse {language} source at line {line}: {reason}")]
    Parse {
        language: &'static str,
        line: usize,
        reason: String,
    },
    #[error("invalid tree query: {0}")]
    Query(#[from] tree_sitter::QueryError),
    #[error("{0}")]
    Internal(String),
}

impl DetectError {
    /// Line the failure refers to, when it has one.
    pub fn line(&self) -> usize {
        match self {
            DetectError::Parse { line, .. } => *line,
            _ => 1,
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, DetectError::Parse { .. })
    }
}

/// Errors loading or validating an [`AuditConfig`](crate::config::AuditConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

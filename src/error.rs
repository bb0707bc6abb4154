//! Error types for context budget management

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ContextError>;

/// Reasons a message is refused at ingestion
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("single message too large: {tokens} tokens (max: {limit})")]
    MessageTooLarge { tokens: usize, limit: usize },
}

/// Crate-wide error
///
/// Only `Validation` is meant to reach callers of the ingestion path. The
/// other variants are produced at collaborator seams and degraded to
/// fallbacks or log lines by the components that see them.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ContextError {
    /// True for errors the caller is expected to act on
    pub fn is_validation(&self) -> bool {
        matches!(self, ContextError::Validation(_))
    }
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ContextError::from(ValidationError::MessageTooLarge {
            tokens: 120,
            limit: 100,
        });
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Validation failed: single message too large: 120 tokens (max: 100)"
        );
    }

    #[test]
    fn test_backend_error_is_not_validation() {
        let err = ContextError::Backend("timeout".to_string());
        assert!(!err.is_validation());
    }
}

//! Error types for the replication engine.

use crate::target::TargetError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Target store error.
    #[error("target error: {0}")]
    Target(#[from] TargetError),

    /// Record model error.
    #[error("model error: {0}")]
    Model(#[from] tandem_model::ModelError),

    /// I/O error (failure log).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (failure log).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The background replay worker is gone.
    #[error("replay worker stopped")]
    WorkerStopped,
}

impl EngineError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true if retrying the same batch may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Target(e) => e.is_connection(),
            EngineError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retryable_errors() {
        assert!(EngineError::from(TargetError::Unreachable("down".into())).is_retryable());
        assert!(EngineError::from(TargetError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(!EngineError::from(TargetError::InvalidUri("x".into())).is_retryable());
        assert!(!EngineError::config("bad").is_retryable());
        assert!(!EngineError::WorkerStopped.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = EngineError::config("TANDEM_POOL_SIZE must be a number");
        assert_eq!(
            err.to_string(),
            "configuration error: TANDEM_POOL_SIZE must be a number"
        );
    }
}

//! Error types for the tandem record model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while describing, registering or snapshotting records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// A record could not be turned into a snapshot.
    #[error("cannot snapshot {entity_kind}: {reason}")]
    Unserializable {
        /// Entity kind of the offending record.
        entity_kind: String,
        /// Why the record could not be captured.
        reason: String,
    },

    /// A schema descriptor is malformed.
    #[error("invalid schema for {entity_kind}: {message}")]
    InvalidSchema {
        /// Entity kind being described.
        entity_kind: String,
        /// Description of the problem.
        message: String,
    },

    /// A different schema is already registered under this kind.
    #[error("entity kind already registered with a different schema: {entity_kind}")]
    DuplicateKind {
        /// The conflicting entity kind.
        entity_kind: String,
    },
}

impl ModelError {
    /// Creates an unserializable-record error.
    pub fn unserializable(entity_kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unserializable {
            entity_kind: entity_kind.into(),
            reason: reason.into(),
        }
    }

    /// Creates the error reported for records whose kind was never registered.
    pub fn unregistered(entity_kind: impl Into<String>) -> Self {
        Self::unserializable(entity_kind, "entity kind is not registered")
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(entity_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            entity_kind: entity_kind.into(),
            message: message.into(),
        }
    }
}

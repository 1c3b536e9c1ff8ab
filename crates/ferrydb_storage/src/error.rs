//! Error types for the storage crate.

use ferrydb_codec::CodecError;
use thiserror::Error;

use crate::document::DocumentId;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in document storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The storage has been closed; no further reads or writes are served.
    #[error("storage '{name}' is closed")]
    Closed {
        /// Name of the closed storage.
        name: String,
    },

    /// A document failed validation and nothing was written.
    #[error("document '{id}' failed validation: {reason}")]
    Validation {
        /// Offending document.
        id: DocumentId,
        /// Validator message.
        reason: String,
    },

    /// Document ids must be non-empty.
    #[error("document id must not be empty")]
    EmptyId,

    /// A revision string could not be parsed.
    #[error("invalid revision '{value}'")]
    InvalidRevision {
        /// The rejected text.
        value: String,
    },

    /// A stored local document could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StorageError {
    /// Create a closed error.
    pub fn closed(name: impl Into<String>) -> Self {
        Self::Closed { name: name.into() }
    }

    /// Create a validation error.
    pub fn validation(id: DocumentId, reason: impl Into<String>) -> Self {
        Self::Validation {
            id,
            reason: reason.into(),
        }
    }

    /// Returns true if the error is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

//! Error types for replication.

use ferrydb_storage::{DocumentId, StorageError};
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while replicating.
///
/// Only configuration problems are returned to the caller of
/// [`ReplicationState::new`](crate::ReplicationState::new). Everything else is
/// reported on the event stream and retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// Network or remote failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the remote suggests trying again.
        retryable: bool,
    },

    /// A pulled document was rejected by the collection's validator.
    #[error("pulled document '{id}' failed validation: {reason}")]
    Validation {
        /// Offending document.
        id: DocumentId,
        /// Validator message.
        reason: String,
    },

    /// Local storage failure.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// A stored checkpoint could not be interpreted.
    #[error("corrupt checkpoint '{key}': {message}")]
    Checkpoint {
        /// Local document key.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// The session configuration is unusable.
    #[error("invalid replication config: {0}")]
    Configuration(String),

    /// A session for the same collection and endpoint is already running.
    #[error("replication of '{collection}' to endpoint {endpoint} is already running")]
    DuplicateSession {
        /// Collection name.
        collection: String,
        /// Endpoint hash.
        endpoint: String,
    },

    /// The session was cancelled while the operation was in flight.
    #[error("replication cancelled")]
    Cancelled,
}

impl ReplicationError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Validation { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the underlying storage has been closed.
    pub fn is_storage_closed(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Closed { .. }))
    }
}

impl From<StorageError> for ReplicationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Validation { id, reason } => Self::Validation { id, reason },
            other => Self::Storage(other),
        }
    }
}

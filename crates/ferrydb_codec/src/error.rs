//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while decoding canonical bytes or converting foreign values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of an item.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Byte offset where more input was expected.
        offset: usize,
    },

    /// Bytes remained after the top-level item.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// The input is valid CBOR but not in canonical form.
    #[error("non-canonical encoding: {reason}")]
    NonCanonical {
        /// What rule was broken.
        reason: String,
    },

    /// Floating point numbers have no representation in document values.
    #[error("floating point values are not supported")]
    FloatForbidden,

    /// Indefinite-length strings, arrays and maps are rejected.
    #[error("indefinite-length items are not supported")]
    IndefiniteLength,

    /// A text string was not valid UTF-8.
    #[error("invalid UTF-8 in text string")]
    InvalidUtf8,

    /// A CBOR construct outside the supported subset.
    #[error("unsupported item: {what}")]
    Unsupported {
        /// Description of the rejected construct.
        what: String,
    },

    /// An integer does not fit in `i64`.
    #[error("integer out of range")]
    IntegerOverflow,

    /// A declared length exceeds the decoder's limits.
    #[error("declared length {claimed} exceeds limit {limit}")]
    SizeLimitExceeded {
        /// The length announced by the header.
        claimed: u64,
        /// The maximum accepted by the decoder.
        limit: u64,
    },
}

impl CodecError {
    /// Create a non-canonical error.
    pub fn non_canonical(reason: impl Into<String>) -> Self {
        Self::NonCanonical {
            reason: reason.into(),
        }
    }

    /// Create an unsupported-item error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }
}

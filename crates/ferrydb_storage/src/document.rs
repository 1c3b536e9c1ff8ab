//! Documents, revisions and change-feed rows.

use std::fmt;
use std::str::FromStr;

use ferrydb_codec::{to_canonical_bytes, Value};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Length in hex characters of the hash part of a locally generated revision.
const LOCAL_HASH_LEN: usize = 32;

/// Primary key of a document within a collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the empty id, which storage refuses to write.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Revision of a document state, rendered as `<height>-<hash>`.
///
/// The height grows by one with every write of the same document. The hash
/// identifies the content that produced the revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    height: u64,
    hash: String,
}

impl Revision {
    /// Build a revision from its parts.
    ///
    /// The hash must be non-empty lowercase alphanumeric text.
    pub fn new(height: u64, hash: impl Into<String>) -> Result<Self, StorageError> {
        let hash = hash.into();
        let well_formed = !hash.is_empty()
            && hash
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase());
        if height == 0 || !well_formed {
            return Err(StorageError::InvalidRevision {
                value: format!("{height}-{hash}"),
            });
        }
        Ok(Self { height, hash })
    }

    /// Revision for a local write on top of `previous`.
    pub fn next_local(previous: Option<&Revision>, data: &Value, deleted: bool) -> Self {
        let digest = hex::encode(content_digest(data, deleted));
        Self {
            height: previous.map_or(1, |rev| rev.height + 1),
            hash: digest[..LOCAL_HASH_LEN].to_string(),
        }
    }

    /// Write counter of the document.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Content part of the revision.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.height, self.hash)
    }
}

impl FromStr for Revision {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidRevision {
            value: s.to_string(),
        };
        let (height, hash) = s.split_once('-').ok_or_else(invalid)?;
        let height = height.parse::<u64>().map_err(|_| invalid())?;
        Self::new(height, hash).map_err(|_| invalid())
    }
}

/// SHA-256 over the canonical bytes of a document state.
pub fn content_digest(data: &Value, deleted: bool) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_bytes(data));
    hasher.update([u8::from(deleted)]);
    hasher.finalize().into()
}

/// A stored document.
///
/// Deleted documents are kept as tombstones: they stay in the change feed so
/// deletions replicate, but are not visible to reads such as
/// [`DocumentStorage::all`](crate::DocumentStorage::all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Primary key.
    pub id: DocumentId,
    /// Document body.
    pub data: Value,
    /// Tombstone flag.
    pub deleted: bool,
    /// Revision of this state.
    pub revision: Revision,
}

/// A document as seen by the change feed, with its storage sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRow {
    /// Latest state of the document.
    pub document: Document,
    /// Sequence number of the write that produced this state.
    pub sequence: u64,
}

/// One page of [`DocumentStorage::changes_since`](crate::DocumentStorage::changes_since).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesPage {
    /// Rows in ascending sequence order.
    pub changes: Vec<ChangeRow>,
    /// Sequence of the last row, or the requested sequence if the page is empty.
    pub last_sequence: u64,
}

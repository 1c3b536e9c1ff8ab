//! Storage trait used by replication.

use ferrydb_codec::Value;

use crate::document::{ChangesPage, Document, DocumentId};
use crate::error::StorageResult;
use crate::feed::ChangeStream;

/// Document storage for a single collection.
///
/// Implementations keep a *latest-state change feed*: every write gets the
/// next sequence number, and a document only appears in the feed at the
/// sequence of its most recent write. Paging through
/// [`changes_since`](Self::changes_since) therefore yields each document at
/// most once per pass, in the order of their last modification.
///
/// Local documents ([`get_local`](Self::get_local) and friends) live beside
/// the collection. They are never part of the feed and never visible to
/// document reads, which makes them a place for replication metadata.
///
/// # Thread Safety
///
/// All methods take `&self`; implementations must be safe to share across
/// tasks.
pub trait DocumentStorage: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Fetch a document, tombstones included.
    fn get(&self, id: &DocumentId) -> StorageResult<Option<Document>>;

    /// All non-deleted documents in id order.
    fn all(&self) -> StorageResult<Vec<Document>>;

    /// Number of non-deleted documents.
    fn count(&self) -> StorageResult<usize>;

    /// Application write: insert or replace a document body.
    ///
    /// Generates the next local revision. Writing over a tombstone revives
    /// the document.
    fn upsert(&self, id: DocumentId, data: Value) -> StorageResult<Document>;

    /// Application delete: turn the document into a tombstone.
    ///
    /// Returns `None` when there was no live document.
    fn remove(&self, id: &DocumentId) -> StorageResult<Option<Document>>;

    /// Replication write: store documents with their revisions as given.
    ///
    /// The batch is validated as a whole before anything is written and is
    /// applied atomically: either every document is stored or none is.
    fn bulk_write(&self, documents: Vec<Document>) -> StorageResult<()>;

    /// Up to `limit` latest-state rows with a sequence greater than `sequence`.
    fn changes_since(&self, sequence: u64, limit: usize) -> StorageResult<ChangesPage>;

    /// Sequence of the most recent write, 0 for an untouched storage.
    fn max_sequence(&self) -> StorageResult<u64>;

    /// Read a local document.
    fn get_local(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Insert or replace a local document.
    fn set_local(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Delete a local document, returning whether it existed.
    fn remove_local(&self, key: &str) -> StorageResult<bool>;

    /// Subscribe to committed writes.
    ///
    /// The stream ends when the storage is closed.
    fn subscribe(&self) -> ChangeStream;

    /// Close the storage. Idempotent.
    fn close(&self);

    /// Whether [`close`](Self::close) was called.
    fn is_closed(&self) -> bool;
}

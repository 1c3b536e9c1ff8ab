//! In-memory remote endpoints.
//!
//! [`MemoryRemote`] behaves like a small replication backend: every write
//! is stamped with a logical `updated_at`, pulls page through documents in
//! `(updated_at, id)` order, and pushes can be refused by a last-writer-wins
//! rule on a numeric field. [`FlakyTransport`] wraps any transport and fails
//! a number of calls first.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ferrydb_codec::Value;
use ferrydb_replication::{
    PullBatch, PushOutcome, PushRow, RemoteDocument, ReplicationError, ReplicationResult,
    ReplicationTransport, UpdatedAtCursor,
};
use ferrydb_storage::DocumentId;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct RemoteEntry {
    data: Value,
    deleted: bool,
    updated_at: i64,
}

#[derive(Debug, Default)]
struct RemoteInner {
    documents: BTreeMap<DocumentId, RemoteEntry>,
    clock: i64,
    conflict_field: Option<String>,
    pull_calls: usize,
    push_batches: Vec<Vec<PushRow>>,
}

impl RemoteInner {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn store(&mut self, id: DocumentId, data: Value, deleted: bool, updated_at: i64) {
        self.clock = self.clock.max(updated_at);
        self.documents.insert(
            id,
            RemoteEntry {
                data,
                deleted,
                updated_at,
            },
        );
    }

    /// Refusal reason if `row` loses against the stored state.
    fn conflict(&self, row: &PushRow) -> Option<String> {
        let field = self.conflict_field.as_deref()?;
        let stored = self.documents.get(&row.id).filter(|e| !e.deleted)?;
        let remote = stored.data.get(field).and_then(Value::as_integer)?;
        let local = row.data.get(field).and_then(Value::as_integer).unwrap_or(i64::MIN);
        (remote > local).then(|| format!("remote '{field}' {remote} is newer than {local}"))
    }
}

/// A remote endpoint held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<RemoteInner>>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse pushed rows whose integer `field` is lower than the stored one.
    pub fn with_conflict_field(self, field: impl Into<String>) -> Self {
        self.inner.lock().conflict_field = Some(field.into());
        self
    }

    /// Write a document on the remote side. Returns its `updated_at`.
    pub fn write(&self, id: impl Into<DocumentId>, data: Value) -> i64 {
        let mut inner = self.inner.lock();
        let at = inner.tick();
        inner.store(id.into(), data, false, at);
        at
    }

    /// Write a document with an explicit `updated_at`, allowing ties.
    pub fn write_at(&self, id: impl Into<DocumentId>, data: Value, updated_at: i64) {
        self.inner.lock().store(id.into(), data, false, updated_at);
    }

    /// Delete a document on the remote side. Returns false if unknown.
    pub fn delete(&self, id: impl Into<DocumentId>) -> bool {
        let id = id.into();
        let mut inner = self.inner.lock();
        let Some(data) = inner.documents.get(&id).map(|e| e.data.clone()) else {
            return false;
        };
        let at = inner.tick();
        inner.store(id, data, true, at);
        true
    }

    /// Current remote state of `id`, tombstones included.
    pub fn get(&self, id: impl Into<DocumentId>) -> Option<RemoteDocument> {
        let id = id.into();
        self.inner.lock().documents.get(&id).map(|e| RemoteDocument {
            id,
            data: e.data.clone(),
            deleted: e.deleted,
        })
    }

    /// Every remote document in id order, tombstones included.
    pub fn documents(&self) -> Vec<RemoteDocument> {
        self.inner
            .lock()
            .documents
            .iter()
            .map(|(id, e)| RemoteDocument {
                id: id.clone(),
                data: e.data.clone(),
                deleted: e.deleted,
            })
            .collect()
    }

    /// Number of documents that are not deleted.
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .documents
            .values()
            .filter(|e| !e.deleted)
            .count()
    }

    /// Number of pull calls served.
    pub fn pull_calls(&self) -> usize {
        self.inner.lock().pull_calls
    }

    /// Rows of every push received, in arrival order.
    pub fn push_batches(&self) -> Vec<Vec<PushRow>> {
        self.inner.lock().push_batches.clone()
    }

    /// Total rows received by push.
    pub fn pushed_rows(&self) -> usize {
        self.inner.lock().push_batches.iter().map(Vec::len).sum()
    }
}

impl ReplicationTransport for MemoryRemote {
    type Cursor = UpdatedAtCursor;

    async fn pull(
        &self,
        cursor: Option<&UpdatedAtCursor>,
        batch_size: usize,
    ) -> ReplicationResult<PullBatch<UpdatedAtCursor>> {
        let mut inner = self.inner.lock();
        inner.pull_calls += 1;

        let mut pending: Vec<(UpdatedAtCursor, RemoteDocument)> = inner
            .documents
            .iter()
            .map(|(id, e)| {
                (
                    UpdatedAtCursor::new(e.updated_at, id.clone()),
                    RemoteDocument {
                        id: id.clone(),
                        data: e.data.clone(),
                        deleted: e.deleted,
                    },
                )
            })
            .filter(|(position, _)| cursor.map_or(true, |c| position > c))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending.truncate(batch_size);

        let cursor = pending.last().map(|(position, _)| position.clone());
        Ok(PullBatch {
            documents: pending.into_iter().map(|(_, doc)| doc).collect(),
            cursor,
        })
    }

    async fn push(&self, rows: Vec<PushRow>) -> ReplicationResult<Vec<PushOutcome>> {
        let mut inner = self.inner.lock();
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(reason) = inner.conflict(row) {
                outcomes.push(PushOutcome::Conflict {
                    id: row.id.clone(),
                    reason,
                });
                continue;
            }
            let at = inner.tick();
            inner.store(row.id.clone(), row.data.clone(), row.deleted, at);
            outcomes.push(PushOutcome::Accepted { id: row.id.clone() });
        }
        inner.push_batches.push(rows);
        Ok(outcomes)
    }
}

/// Fails the first `failures` calls, pull or push, with a retryable
/// transport error, then delegates to the wrapped transport.
#[derive(Debug)]
pub struct FlakyTransport<T> {
    inner: T,
    remaining: AtomicUsize,
    failed: AtomicUsize,
}

impl<T> FlakyTransport<T> {
    /// Wraps `inner`, failing its first `failures` calls.
    pub fn new(inner: T, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
            failed: AtomicUsize::new(0),
        }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Number of calls failed so far.
    pub fn failed_calls(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let took = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        took
    }
}

impl<T: ReplicationTransport> ReplicationTransport for FlakyTransport<T> {
    type Cursor = T::Cursor;

    async fn pull(
        &self,
        cursor: Option<&T::Cursor>,
        batch_size: usize,
    ) -> ReplicationResult<PullBatch<T::Cursor>> {
        if self.should_fail() {
            return Err(ReplicationError::transport_retryable("connection reset"));
        }
        self.inner.pull(cursor, batch_size).await
    }

    async fn push(&self, rows: Vec<PushRow>) -> ReplicationResult<Vec<PushOutcome>> {
        if self.should_fail() {
            return Err(ReplicationError::transport_retryable("connection reset"));
        }
        self.inner.push(rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrydb_storage::Revision;

    fn row(id: &str, version: i64) -> PushRow {
        PushRow {
            id: id.into(),
            data: Value::object([("version", version)]),
            deleted: false,
            revision: Revision::new(1, "abc").unwrap(),
        }
    }

    #[tokio::test]
    async fn pages_in_cursor_order() {
        let remote = MemoryRemote::new();
        remote.write("b", Value::object([("n", 1)]));
        remote.write("a", Value::object([("n", 2)]));
        remote.write("c", Value::object([("n", 3)]));

        let first = remote.pull(None, 2).await.unwrap();
        let ids: Vec<&str> = first.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);

        let second = remote.pull(first.cursor.as_ref(), 2).await.unwrap();
        assert_eq!(second.documents.len(), 1);
        assert_eq!(second.documents[0].id.as_str(), "c");

        let third = remote.pull(second.cursor.as_ref(), 2).await.unwrap();
        assert!(third.documents.is_empty());
        assert!(third.cursor.is_none());
    }

    #[tokio::test]
    async fn ties_break_on_id() {
        let remote = MemoryRemote::new();
        for id in ["c", "a", "b"] {
            remote.write_at(id, Value::object([("id", id)]), 7);
        }
        let first = remote.pull(None, 1).await.unwrap();
        assert_eq!(first.cursor, Some(UpdatedAtCursor::new(7, "a")));
        let rest = remote.pull(first.cursor.as_ref(), 10).await.unwrap();
        let ids: Vec<&str> = rest.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[tokio::test]
    async fn delete_moves_document_forward() {
        let remote = MemoryRemote::new();
        remote.write("a", Value::object([("n", 1)]));
        let seen = remote.pull(None, 10).await.unwrap();
        assert!(remote.delete("a"));
        assert!(!remote.delete("missing"));

        let after = remote.pull(seen.cursor.as_ref(), 10).await.unwrap();
        assert_eq!(after.documents.len(), 1);
        assert!(after.documents[0].deleted);
        assert_eq!(remote.live_count(), 0);
    }

    #[tokio::test]
    async fn conflict_field_refuses_older_rows() {
        let remote = MemoryRemote::new().with_conflict_field("version");
        remote.write("a", Value::object([("version", 5)]));

        let outcomes = remote.push(vec![row("a", 3), row("b", 1)]).await.unwrap();
        assert!(matches!(outcomes[0], PushOutcome::Conflict { .. }));
        assert_eq!(outcomes[1], PushOutcome::Accepted { id: "b".into() });

        let outcomes = remote.push(vec![row("a", 6)]).await.unwrap();
        assert_eq!(outcomes[0], PushOutcome::Accepted { id: "a".into() });
        assert_eq!(remote.pushed_rows(), 3);
    }

    #[tokio::test]
    async fn flaky_fails_then_recovers() {
        let flaky = FlakyTransport::new(MemoryRemote::new(), 2);
        assert!(flaky.pull(None, 10).await.is_err());
        assert!(flaky.push(vec![row("a", 1)]).await.is_err());
        assert!(flaky.pull(None, 10).await.is_ok());
        assert_eq!(flaky.failed_calls(), 2);
        assert_eq!(flaky.inner().pull_calls(), 1);
    }
}

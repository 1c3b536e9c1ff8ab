//! Pull engine: remote changes into local storage.

use std::sync::Arc;

use ferrydb_storage::{Document, DocumentStorage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{ReplicationError, ReplicationResult};
use crate::events::{Direction, EventBus, ReplicationEvent};
use crate::revision::RevisionTagger;
use crate::transport::ReplicationTransport;

/// What one pull batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Entries returned by the remote.
    pub fetched: usize,
    /// Entries that changed local storage.
    pub applied: usize,
    /// Whether the remote probably has more.
    pub has_more: bool,
}

/// Fetches batches since the pull checkpoint and applies them.
pub struct PullEngine<T: ReplicationTransport> {
    transport: Arc<T>,
    storage: Arc<dyn DocumentStorage>,
    checkpoints: CheckpointStore,
    tagger: RevisionTagger,
    events: Arc<EventBus>,
    batch_size: usize,
}

impl<T: ReplicationTransport> PullEngine<T> {
    /// Creates an engine.
    pub fn new(
        transport: Arc<T>,
        storage: Arc<dyn DocumentStorage>,
        checkpoints: CheckpointStore,
        events: Arc<EventBus>,
        batch_size: usize,
    ) -> Self {
        Self {
            tagger: RevisionTagger::new(checkpoints.endpoint()),
            transport,
            storage,
            checkpoints,
            events,
            batch_size,
        }
    }

    /// Pull and apply one batch.
    ///
    /// The batch is written atomically and the checkpoint moves only after
    /// the write. A non-empty batch must carry a cursor that does not go
    /// back past the checkpoint, otherwise nothing is applied. If `cancel`
    /// fires while the remote call is in flight the call is dropped and
    /// nothing is applied.
    pub async fn run_batch(&self, cancel: &CancellationToken) -> ReplicationResult<PullReport> {
        let since = self.checkpoints.pull_checkpoint::<T::Cursor>()?;

        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplicationError::Cancelled),
            result = self.transport.pull(since.as_ref(), self.batch_size) => result?,
        };
        if cancel.is_cancelled() {
            return Err(ReplicationError::Cancelled);
        }

        let fetched = batch.documents.len();
        if fetched == 0 {
            debug!(collection = self.storage.name(), "pull drained");
            return Ok(PullReport::default());
        }

        let next = match (batch.cursor, since) {
            (Some(next), Some(previous)) if next < previous => {
                warn!(
                    collection = self.storage.name(),
                    ?next,
                    ?previous,
                    "remote returned a cursor before the checkpoint"
                );
                return Err(ReplicationError::transport_retryable(
                    "remote returned a cursor before the checkpoint",
                ));
            }
            (Some(next), _) => next,
            (None, _) => {
                warn!(
                    collection = self.storage.name(),
                    fetched, "remote returned entries without a cursor"
                );
                return Err(ReplicationError::transport_retryable(
                    "remote returned entries without a cursor",
                ));
            }
        };

        for remote in &batch.documents {
            self.events.emit(ReplicationEvent::Received(remote.clone()));
        }

        let mut writes: Vec<Document> = Vec::with_capacity(fetched);
        for remote in batch.documents {
            // A document may appear twice in one batch; chain off the pending write.
            let current = match writes.iter().rposition(|d| d.id == remote.id) {
                Some(i) => Some(writes[i].clone()),
                None => self.storage.get(&remote.id)?,
            };
            // Same content already stored, whether written here or pulled before.
            if current
                .as_ref()
                .is_some_and(|c| c.deleted == remote.deleted && c.data == remote.data)
            {
                continue;
            }
            let revision = self.tagger.tag_as_pulled(
                &remote.data,
                remote.deleted,
                current.as_ref().map(|d| &d.revision),
            )?;
            writes.push(Document {
                id: remote.id,
                data: remote.data,
                deleted: remote.deleted,
                revision,
            });
        }

        let applied = writes.len();
        if applied > 0 {
            self.storage.bulk_write(writes.clone())?;
            for document in writes {
                self.events.emit(ReplicationEvent::Change {
                    direction: Direction::Pull,
                    document,
                });
            }
        }

        self.checkpoints.set_pull_checkpoint(&next)?;

        debug!(
            collection = self.storage.name(),
            fetched, applied, "pulled batch"
        );
        Ok(PullReport {
            fetched,
            applied,
            has_more: fetched == self.batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::UpdatedAtCursor;
    use crate::endpoint::EndpointHash;
    use crate::transport::{MockTransport, PullBatch, RemoteDocument};
    use ferrydb_codec::Value;
    use ferrydb_storage::{MemoryStorage, RequiredFields};
    use tokio::sync::Notify;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        transport: Arc<MockTransport>,
        checkpoints: CheckpointStore,
        engine: PullEngine<MockTransport>,
        events: Arc<EventBus>,
    }

    fn build(storage: MemoryStorage, transport: MockTransport, batch_size: usize) -> Fixture {
        let storage = Arc::new(storage);
        let transport = Arc::new(transport);
        let events = Arc::new(EventBus::new());
        let checkpoints = CheckpointStore::new(
            storage.clone(),
            EndpointHash::derive(&["db", "todos", "remote"]),
        );
        let engine = PullEngine::new(
            transport.clone(),
            storage.clone(),
            checkpoints.clone(),
            events.clone(),
            batch_size,
        );
        Fixture {
            storage,
            transport,
            checkpoints,
            engine,
            events,
        }
    }

    fn fixture_with(storage: MemoryStorage, batch_size: usize) -> Fixture {
        build(storage, MockTransport::new(), batch_size)
    }

    fn fixture(batch_size: usize) -> Fixture {
        fixture_with(MemoryStorage::new("todos"), batch_size)
    }

    fn remote(id: &str, title: &str) -> RemoteDocument {
        RemoteDocument::live(id, Value::object([("title", title)]))
    }

    fn batch(docs: Vec<RemoteDocument>, at: i64) -> PullBatch<UpdatedAtCursor> {
        let cursor = docs.last().map(|d| UpdatedAtCursor::new(at, d.id.clone()));
        PullBatch {
            documents: docs,
            cursor,
        }
    }

    #[tokio::test]
    async fn applies_batch_and_commits_cursor() {
        let f = fixture(2);
        f.transport
            .queue_pull(Ok(batch(vec![remote("a", "x"), remote("b", "y")], 5)));

        let report = f.engine.run_batch(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            report,
            PullReport {
                fetched: 2,
                applied: 2,
                has_more: true
            }
        );
        assert_eq!(f.storage.count().unwrap(), 2);
        assert_eq!(
            f.checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            Some(UpdatedAtCursor::new(5, "b"))
        );
    }

    #[tokio::test]
    async fn passes_checkpoint_to_remote() {
        let f = fixture(10);
        f.checkpoints
            .set_pull_checkpoint(&UpdatedAtCursor::new(3, "c"))
            .unwrap();
        f.engine.run_batch(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            f.transport.pull_requests(),
            vec![Some(UpdatedAtCursor::new(3, "c"))]
        );
    }

    #[tokio::test]
    async fn pulled_revisions_carry_marker() {
        let f = fixture(10);
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));
        f.engine.run_batch(&CancellationToken::new()).await.unwrap();

        let stored = f.storage.get(&"a".into()).unwrap().unwrap();
        assert!(f.engine.tagger.is_tagged_as_pulled(&stored.revision));
    }

    #[tokio::test]
    async fn identical_state_is_not_rewritten() {
        let f = fixture(10);
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));

        let cancel = CancellationToken::new();
        f.engine.run_batch(&cancel).await.unwrap();
        let sequence = f.storage.max_sequence().unwrap();
        let report = f.engine.run_batch(&cancel).await.unwrap();

        assert_eq!(report.applied, 0);
        assert_eq!(f.storage.max_sequence().unwrap(), sequence);
    }

    #[tokio::test]
    async fn remote_wins_over_local_edit() {
        let f = fixture(10);
        f.storage
            .upsert("a".into(), Value::object([("title", "local")]))
            .unwrap();
        f.transport.queue_pull(Ok(batch(vec![remote("a", "remote")], 1)));
        f.engine.run_batch(&CancellationToken::new()).await.unwrap();

        let stored = f.storage.get(&"a".into()).unwrap().unwrap();
        assert_eq!(stored.data.get("title"), Some(&Value::from("remote")));
        assert_eq!(stored.revision.height(), 2);
    }

    #[tokio::test]
    async fn unknown_deletion_stored_as_tombstone() {
        let f = fixture(10);
        f.transport.queue_pull(Ok(batch(
            vec![RemoteDocument::deleted("ghost", Value::Null)],
            1,
        )));
        f.engine.run_batch(&CancellationToken::new()).await.unwrap();

        let stored = f.storage.get(&"ghost".into()).unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(f.storage.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch() {
        let f = fixture(10);
        f.transport
            .queue_pull(Ok(batch(vec![remote("a", "1"), remote("a", "2")], 1)));
        let report = f.engine.run_batch(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.applied, 2);
        let stored = f.storage.get(&"a".into()).unwrap().unwrap();
        assert_eq!(stored.data.get("title"), Some(&Value::from("2")));
        assert_eq!(stored.revision.height(), 2);
    }

    #[tokio::test]
    async fn validation_failure_aborts_batch() {
        let f = fixture_with(
            MemoryStorage::new("todos").with_validator(Arc::new(RequiredFields::new(["title"]))),
            10,
        );
        f.transport.queue_pull(Ok(batch(
            vec![
                remote("a", "x"),
                RemoteDocument::live("b", Value::object([("other", 1)])),
            ],
            1,
        )));

        let err = f.engine.run_batch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Validation { .. }));
        assert_eq!(f.storage.max_sequence().unwrap(), 0);
        assert_eq!(
            f.checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn transport_error_leaves_checkpoint() {
        let f = fixture(10);
        f.transport
            .queue_pull(Err(ReplicationError::transport_retryable("offline")));
        assert!(f.engine.run_batch(&CancellationToken::new()).await.is_err());
        assert_eq!(
            f.checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn regressing_cursor_fails_batch() {
        let f = fixture(10);
        f.checkpoints
            .set_pull_checkpoint(&UpdatedAtCursor::new(9, "z"))
            .unwrap();
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));

        let err = f.engine.run_batch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Transport { .. }));
        assert!(err.is_retryable());
        assert_eq!(f.storage.max_sequence().unwrap(), 0);
        assert_eq!(
            f.checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            Some(UpdatedAtCursor::new(9, "z"))
        );
    }

    #[tokio::test]
    async fn entries_without_cursor_fail_batch() {
        let f = fixture(10);
        f.transport.queue_pull(Ok(PullBatch {
            documents: vec![remote("a", "x")],
            cursor: None,
        }));

        let err = f.engine.run_batch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Transport { .. }));
        assert_eq!(f.storage.max_sequence().unwrap(), 0);
        assert_eq!(
            f.checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn local_write_with_same_body_is_kept() {
        let f = fixture(10);
        let local = f
            .storage
            .upsert("a".into(), Value::object([("title", "x")]))
            .unwrap();
        let sequence = f.storage.max_sequence().unwrap();
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));

        let report = f.engine.run_batch(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.applied, 0);
        assert_eq!(f.storage.max_sequence().unwrap(), sequence);
        let stored = f.storage.get(&"a".into()).unwrap().unwrap();
        assert_eq!(stored.revision, local.revision);
        assert_eq!(
            f.checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            Some(UpdatedAtCursor::new(1, "a"))
        );
    }

    #[tokio::test]
    async fn cancel_while_remote_call_in_flight() {
        let gate = Arc::new(Notify::new());
        let f = build(
            MemoryStorage::new("todos"),
            MockTransport::new().with_gate(gate.clone()),
            10,
        );
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));
        let cancel = CancellationToken::new();

        let (result, ()) = tokio::join!(f.engine.run_batch(&cancel), async {
            while f.transport.pull_requests().is_empty() {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
            gate.notify_one();
        });

        assert_eq!(result, Err(ReplicationError::Cancelled));
        assert_eq!(f.storage.max_sequence().unwrap(), 0);
        assert_eq!(
            f.checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn cancelled_before_call() {
        let f = fixture(10);
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            f.engine.run_batch(&cancel).await,
            Err(ReplicationError::Cancelled)
        );
        assert_eq!(f.storage.max_sequence().unwrap(), 0);
    }

    #[tokio::test]
    async fn emits_received_then_change() {
        let f = fixture(10);
        let mut events = f.events.subscribe();
        f.transport.queue_pull(Ok(batch(vec![remote("a", "x")], 1)));
        f.engine.run_batch(&CancellationToken::new()).await.unwrap();

        assert!(matches!(
            events.try_recv().unwrap(),
            ReplicationEvent::Received(_)
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            ReplicationEvent::Change {
                direction: Direction::Pull,
                ..
            }
        ));
    }
}

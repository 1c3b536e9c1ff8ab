//! In-memory document storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ferrydb_codec::{from_canonical_bytes, to_canonical_bytes, Value};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::backend::DocumentStorage;
use crate::document::{ChangeRow, ChangesPage, Document, DocumentId, Revision};
use crate::error::{StorageError, StorageResult};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeStream, WriteOrigin};
use crate::validator::DocumentValidator;

#[derive(Debug, Clone, Default)]
struct State {
    /// Latest state of every document and the sequence that wrote it.
    documents: HashMap<DocumentId, (Document, u64)>,
    /// Sequence index of the latest-state feed.
    by_sequence: BTreeMap<u64, DocumentId>,
    /// Local documents, stored in canonical form.
    locals: BTreeMap<String, Vec<u8>>,
    sequence: u64,
}

impl State {
    fn commit(&mut self, document: Document) -> u64 {
        self.sequence += 1;
        let sequence = self.sequence;
        if let Some((_, previous)) = self.documents.get(&document.id) {
            self.by_sequence.remove(previous);
        }
        self.by_sequence.insert(sequence, document.id.clone());
        self.documents.insert(document.id.clone(), (document, sequence));
        sequence
    }
}

/// A collection held entirely in memory.
///
/// Suitable for tests, simulations and ephemeral replicas.
/// [`reopen`](Self::reopen) produces a fresh handle over a copy of the data,
/// which is how restarts are modelled.
///
/// ```
/// use ferrydb_codec::Value;
/// use ferrydb_storage::{DocumentStorage, MemoryStorage};
///
/// let todos = MemoryStorage::new("todos");
/// todos.upsert("a".into(), Value::object([("title", "milk")])).unwrap();
/// let page = todos.changes_since(0, 10).unwrap();
/// assert_eq!(page.changes.len(), 1);
/// assert_eq!(page.last_sequence, 1);
/// ```
pub struct MemoryStorage {
    name: String,
    state: RwLock<State>,
    feed: ChangeFeed,
    validator: Option<Arc<dyn DocumentValidator>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(State::default()),
            feed: ChangeFeed::default(),
            validator: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Run `validator` on every live write.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn DocumentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Close this handle and return a new one over the same data.
    ///
    /// Subscribers of the old handle see their streams end.
    pub fn reopen(&self) -> Self {
        self.close();
        Self {
            name: self.name.clone(),
            state: RwLock::new(self.state.read().clone()),
            feed: ChangeFeed::default(),
            validator: self.validator.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::closed(&self.name));
        }
        Ok(())
    }

    fn validate(&self, document: &Document) -> StorageResult<()> {
        if document.id.is_empty() {
            return Err(StorageError::EmptyId);
        }
        if document.deleted {
            return Ok(());
        }
        match &self.validator {
            Some(validator) => validator
                .validate(&document.id, &document.data)
                .map_err(|reason| StorageError::validation(document.id.clone(), reason)),
            None => Ok(()),
        }
    }

    fn commit_and_emit(&self, state: &mut State, document: Document, origin: WriteOrigin) {
        let sequence = state.commit(document.clone());
        self.feed.emit(&ChangeEvent {
            sequence,
            document,
            origin,
        });
    }
}

impl DocumentStorage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, id: &DocumentId) -> StorageResult<Option<Document>> {
        self.ensure_open()?;
        Ok(self.state.read().documents.get(id).map(|(d, _)| d.clone()))
    }

    fn all(&self) -> StorageResult<Vec<Document>> {
        self.ensure_open()?;
        let state = self.state.read();
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|(d, _)| !d.deleted)
            .map(|(d, _)| d.clone())
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    fn count(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .documents
            .values()
            .filter(|(d, _)| !d.deleted)
            .count())
    }

    fn upsert(&self, id: DocumentId, data: Value) -> StorageResult<Document> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let previous = state.documents.get(&id).map(|(d, _)| d.revision.clone());
        let document = Document {
            revision: Revision::next_local(previous.as_ref(), &data, false),
            id,
            data,
            deleted: false,
        };
        self.validate(&document)?;
        self.commit_and_emit(&mut state, document.clone(), WriteOrigin::Local);
        Ok(document)
    }

    fn remove(&self, id: &DocumentId) -> StorageResult<Option<Document>> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let current = match state.documents.get(id) {
            Some((doc, _)) if !doc.deleted => doc.clone(),
            _ => return Ok(None),
        };
        let tombstone = Document {
            revision: Revision::next_local(Some(&current.revision), &current.data, true),
            deleted: true,
            ..current
        };
        self.commit_and_emit(&mut state, tombstone.clone(), WriteOrigin::Local);
        Ok(Some(tombstone))
    }

    fn bulk_write(&self, documents: Vec<Document>) -> StorageResult<()> {
        self.ensure_open()?;
        for document in &documents {
            self.validate(document)?;
        }
        let mut state = self.state.write();
        for document in documents {
            self.commit_and_emit(&mut state, document, WriteOrigin::Bulk);
        }
        Ok(())
    }

    fn changes_since(&self, sequence: u64, limit: usize) -> StorageResult<ChangesPage> {
        self.ensure_open()?;
        let state = self.state.read();
        let changes: Vec<ChangeRow> = state
            .by_sequence
            .range(sequence.saturating_add(1)..)
            .take(limit)
            .filter_map(|(seq, id)| {
                state.documents.get(id).map(|(document, _)| ChangeRow {
                    document: document.clone(),
                    sequence: *seq,
                })
            })
            .collect();
        let last_sequence = changes.last().map_or(sequence, |row| row.sequence);
        Ok(ChangesPage {
            changes,
            last_sequence,
        })
    }

    fn max_sequence(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        Ok(self.state.read().sequence)
    }

    fn get_local(&self, key: &str) -> StorageResult<Option<Value>> {
        self.ensure_open()?;
        let state = self.state.read();
        match state.locals.get(key) {
            Some(bytes) => Ok(Some(from_canonical_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    fn set_local(&self, key: &str, value: Value) -> StorageResult<()> {
        self.ensure_open()?;
        self.state
            .write()
            .locals
            .insert(key.to_string(), to_canonical_bytes(&value));
        Ok(())
    }

    fn remove_local(&self, key: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.state.write().locals.remove(key).is_some())
    }

    fn subscribe(&self) -> ChangeStream {
        if self.is_closed() {
            let (_, rx) = mpsc::unbounded_channel();
            return rx;
        }
        self.feed.subscribe()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.feed.close();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::RequiredFields;

    fn doc(title: &str) -> Value {
        Value::object([("title", title)])
    }

    #[test]
    fn upsert_assigns_sequence_and_revision() {
        let storage = MemoryStorage::new("todos");
        let first = storage.upsert("a".into(), doc("one")).unwrap();
        let second = storage.upsert("a".into(), doc("two")).unwrap();
        assert_eq!(first.revision.height(), 1);
        assert_eq!(second.revision.height(), 2);
        assert_eq!(storage.max_sequence().unwrap(), 2);
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[test]
    fn feed_holds_latest_state_only() {
        let storage = MemoryStorage::new("todos");
        storage.upsert("a".into(), doc("a1")).unwrap();
        storage.upsert("b".into(), doc("b1")).unwrap();
        storage.upsert("a".into(), doc("a2")).unwrap();

        let page = storage.changes_since(0, 10).unwrap();
        let seen: Vec<_> = page
            .changes
            .iter()
            .map(|r| (r.document.id.to_string(), r.sequence))
            .collect();
        assert_eq!(seen, vec![("b".into(), 2), ("a".into(), 3)]);
        assert_eq!(page.last_sequence, 3);
    }

    #[test]
    fn changes_since_pages() {
        let storage = MemoryStorage::new("todos");
        for i in 0..5 {
            storage.upsert(format!("d{i}").into(), doc("x")).unwrap();
        }
        let first = storage.changes_since(0, 2).unwrap();
        assert_eq!(first.changes.len(), 2);
        assert_eq!(first.last_sequence, 2);
        let rest = storage.changes_since(first.last_sequence, 10).unwrap();
        assert_eq!(rest.changes.len(), 3);
        let empty = storage.changes_since(5, 10).unwrap();
        assert!(empty.changes.is_empty());
        assert_eq!(empty.last_sequence, 5);
    }

    #[test]
    fn remove_leaves_tombstone() {
        let storage = MemoryStorage::new("todos");
        storage.upsert("a".into(), doc("x")).unwrap();
        let tombstone = storage.remove(&"a".into()).unwrap().unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.revision.height(), 2);
        assert_eq!(storage.count().unwrap(), 0);
        assert!(storage.get(&"a".into()).unwrap().unwrap().deleted);
        assert!(storage.remove(&"a".into()).unwrap().is_none());
        assert!(storage.remove(&"missing".into()).unwrap().is_none());
    }

    #[test]
    fn upsert_revives_tombstone() {
        let storage = MemoryStorage::new("todos");
        storage.upsert("a".into(), doc("x")).unwrap();
        storage.remove(&"a".into()).unwrap();
        let revived = storage.upsert("a".into(), doc("y")).unwrap();
        assert!(!revived.deleted);
        assert_eq!(revived.revision.height(), 3);
    }

    #[test]
    fn bulk_write_is_all_or_nothing() {
        let storage = MemoryStorage::new("todos")
            .with_validator(Arc::new(RequiredFields::new(["title"])));
        let good = Document {
            id: "a".into(),
            data: doc("x"),
            deleted: false,
            revision: "1-aa".parse().unwrap(),
        };
        let bad = Document {
            id: "b".into(),
            data: Value::object([("other", 1)]),
            deleted: false,
            revision: "1-bb".parse().unwrap(),
        };
        let err = storage.bulk_write(vec![good.clone(), bad]).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(storage.max_sequence().unwrap(), 0);

        storage.bulk_write(vec![good.clone()]).unwrap();
        assert_eq!(storage.get(&"a".into()).unwrap(), Some(good));
    }

    #[test]
    fn tombstones_skip_validation() {
        let storage = MemoryStorage::new("todos")
            .with_validator(Arc::new(RequiredFields::new(["title"])));
        let tombstone = Document {
            id: "gone".into(),
            data: Value::Null,
            deleted: true,
            revision: "1-cc".parse().unwrap(),
        };
        storage.bulk_write(vec![tombstone]).unwrap();
        assert_eq!(storage.count().unwrap(), 0);
        assert_eq!(storage.changes_since(0, 10).unwrap().changes.len(), 1);
    }

    #[test]
    fn empty_id_rejected() {
        let storage = MemoryStorage::new("todos");
        assert_eq!(
            storage.upsert("".into(), doc("x")).unwrap_err(),
            StorageError::EmptyId
        );
    }

    #[test]
    fn local_documents_are_invisible() {
        let storage = MemoryStorage::new("todos");
        storage.set_local("meta", Value::object([("seq", 4)])).unwrap();
        assert_eq!(
            storage.get_local("meta").unwrap(),
            Some(Value::object([("seq", 4)]))
        );
        assert_eq!(storage.max_sequence().unwrap(), 0);
        assert_eq!(storage.count().unwrap(), 0);
        assert!(storage.remove_local("meta").unwrap());
        assert!(!storage.remove_local("meta").unwrap());
        assert_eq!(storage.get_local("meta").unwrap(), None);
    }

    #[test]
    fn subscribers_see_commits_in_order() {
        let storage = MemoryStorage::new("todos");
        let mut stream = storage.subscribe();
        storage.upsert("a".into(), doc("x")).unwrap();
        storage.remove(&"a".into()).unwrap();

        let first = stream.try_recv().unwrap();
        let second = stream.try_recv().unwrap();
        assert_eq!((first.sequence, first.origin), (1, WriteOrigin::Local));
        assert!(second.document.deleted);
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn close_ends_streams_and_rejects_io() {
        let storage = MemoryStorage::new("todos");
        let mut stream = storage.subscribe();
        storage.close();
        assert!(matches!(
            stream.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(matches!(
            storage.upsert("a".into(), doc("x")),
            Err(StorageError::Closed { .. })
        ));
        let mut late = storage.subscribe();
        assert!(matches!(
            late.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn reopen_keeps_data() {
        let storage = MemoryStorage::new("todos");
        storage.upsert("a".into(), doc("x")).unwrap();
        storage.set_local("k", Value::from(1)).unwrap();
        let reopened = storage.reopen();
        assert!(storage.is_closed());
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.get_local("k").unwrap(), Some(Value::Integer(1)));
        assert_eq!(reopened.max_sequence().unwrap(), 1);
    }
}

//! Checkpoint persistence.
//!
//! Checkpoints live as local documents of the replicated collection itself,
//! one pair per endpoint:
//!
//! | key                                     | body                              |
//! |-----------------------------------------|-----------------------------------|
//! | `replication-checkpoint-pull-<endpoint>` | `{endpoint, cursor}`              |
//! | `replication-checkpoint-push-<endpoint>` | `{endpoint, sequence}`            |
//!
//! Local documents are outside the change feed, so writing a checkpoint never
//! produces something to push.

use std::sync::Arc;

use ferrydb_codec::Value;
use ferrydb_storage::DocumentStorage;

use crate::cursor::ReplicationCursor;
use crate::endpoint::EndpointHash;
use crate::error::{ReplicationError, ReplicationResult};

const PULL_PREFIX: &str = "replication-checkpoint-pull-";
const PUSH_PREFIX: &str = "replication-checkpoint-push-";

/// Reads and writes the checkpoints of one `(collection, endpoint)` pair.
#[derive(Clone)]
pub struct CheckpointStore {
    storage: Arc<dyn DocumentStorage>,
    endpoint: EndpointHash,
    pull_key: String,
    push_key: String,
}

impl CheckpointStore {
    /// Checkpoints for `endpoint` inside `storage`.
    pub fn new(storage: Arc<dyn DocumentStorage>, endpoint: EndpointHash) -> Self {
        Self {
            pull_key: format!("{PULL_PREFIX}{endpoint}"),
            push_key: format!("{PUSH_PREFIX}{endpoint}"),
            storage,
            endpoint,
        }
    }

    /// Endpoint these checkpoints belong to.
    pub fn endpoint(&self) -> &EndpointHash {
        &self.endpoint
    }

    /// Last committed pull cursor, `None` before the first pulled batch.
    pub fn pull_checkpoint<C: ReplicationCursor>(&self) -> ReplicationResult<Option<C>> {
        let Some(body) = self.storage.get_local(&self.pull_key)? else {
            return Ok(None);
        };
        let cursor = body
            .get("cursor")
            .and_then(C::from_value)
            .ok_or_else(|| self.corrupt(&self.pull_key, "unreadable cursor"))?;
        Ok(Some(cursor))
    }

    /// Persist the pull cursor.
    pub fn set_pull_checkpoint<C: ReplicationCursor>(&self, cursor: &C) -> ReplicationResult<()> {
        let body = Value::object([
            ("endpoint", Value::from(self.endpoint.as_str())),
            ("cursor", cursor.to_value()),
        ]);
        self.storage.set_local(&self.pull_key, body)?;
        Ok(())
    }

    /// Last acknowledged local sequence, 0 before the first push.
    pub fn push_checkpoint(&self) -> ReplicationResult<u64> {
        let Some(body) = self.storage.get_local(&self.push_key)? else {
            return Ok(0);
        };
        body.get("sequence")
            .and_then(Value::as_integer)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| self.corrupt(&self.push_key, "unreadable sequence"))
    }

    /// Persist the push sequence.
    pub fn set_push_checkpoint(&self, sequence: u64) -> ReplicationResult<()> {
        let sequence = i64::try_from(sequence)
            .map_err(|_| self.corrupt(&self.push_key, "sequence out of range"))?;
        let body = Value::object([
            ("endpoint", Value::from(self.endpoint.as_str())),
            ("sequence", Value::Integer(sequence)),
        ]);
        self.storage.set_local(&self.push_key, body)?;
        Ok(())
    }

    /// Forget both checkpoints so the next session starts from scratch.
    pub fn reset(&self) -> ReplicationResult<()> {
        self.storage.remove_local(&self.pull_key)?;
        self.storage.remove_local(&self.push_key)?;
        Ok(())
    }

    fn corrupt(&self, key: &str, message: &str) -> ReplicationError {
        ReplicationError::Checkpoint {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::UpdatedAtCursor;
    use ferrydb_storage::MemoryStorage;

    fn store(storage: &Arc<MemoryStorage>, endpoint: &str) -> CheckpointStore {
        CheckpointStore::new(storage.clone(), EndpointHash::derive(&[endpoint]))
    }

    #[test]
    fn defaults_before_first_write() {
        let storage = Arc::new(MemoryStorage::new("todos"));
        let checkpoints = store(&storage, "e");
        assert_eq!(checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(), None);
        assert_eq!(checkpoints.push_checkpoint().unwrap(), 0);
    }

    #[test]
    fn latest_write_wins() {
        let storage = Arc::new(MemoryStorage::new("todos"));
        let checkpoints = store(&storage, "e");
        checkpoints
            .set_pull_checkpoint(&UpdatedAtCursor::new(1, "a"))
            .unwrap();
        checkpoints
            .set_pull_checkpoint(&UpdatedAtCursor::new(2, "b"))
            .unwrap();
        checkpoints.set_push_checkpoint(9).unwrap();

        assert_eq!(
            checkpoints.pull_checkpoint::<UpdatedAtCursor>().unwrap(),
            Some(UpdatedAtCursor::new(2, "b"))
        );
        assert_eq!(checkpoints.push_checkpoint().unwrap(), 9);
    }

    #[test]
    fn endpoints_are_isolated() {
        let storage = Arc::new(MemoryStorage::new("todos"));
        store(&storage, "one").set_push_checkpoint(5).unwrap();
        assert_eq!(store(&storage, "two").push_checkpoint().unwrap(), 0);
    }

    #[test]
    fn checkpoints_do_not_enter_the_feed() {
        let storage = Arc::new(MemoryStorage::new("todos"));
        store(&storage, "e").set_push_checkpoint(3).unwrap();
        assert_eq!(storage.max_sequence().unwrap(), 0);
    }

    #[test]
    fn survives_reopen() {
        let storage = Arc::new(MemoryStorage::new("todos"));
        store(&storage, "e").set_pull_checkpoint(&17i64).unwrap();
        let reopened = Arc::new(storage.reopen());
        assert_eq!(
            store(&reopened, "e").pull_checkpoint::<i64>().unwrap(),
            Some(17)
        );
    }

    #[test]
    fn reset_clears_both() {
        let storage = Arc::new(MemoryStorage::new("todos"));
        let checkpoints = store(&storage, "e");
        checkpoints.set_pull_checkpoint(&3i64).unwrap();
        checkpoints.set_push_checkpoint(4).unwrap();
        checkpoints.reset().unwrap();
        assert_eq!(checkpoints.pull_checkpoint::<i64>().unwrap(), None);
        assert_eq!(checkpoints.push_checkpoint().unwrap(), 0);
    }

    #[test]
    fn corrupt_checkpoint_reported() {
        let storage = Arc::new(MemoryStorage::new("todos"));
        let checkpoints = store(&storage, "e");
        storage
            .set_local(&checkpoints.push_key, Value::object([("sequence", "x")]))
            .unwrap();
        assert!(matches!(
            checkpoints.push_checkpoint(),
            Err(ReplicationError::Checkpoint { .. })
        ));
    }
}

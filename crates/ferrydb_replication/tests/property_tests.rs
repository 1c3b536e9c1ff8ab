//! Property tests for pull ordering and convergence.

use std::collections::BTreeMap;
use std::sync::Arc;

use ferrydb_codec::Value;
use ferrydb_replication::{ReplicationRegistry, ReplicationStatus};
use ferrydb_storage::{DocumentStorage, MemoryStorage};
use ferrydb_testkit::prelude::*;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime")
}

fn pull_once(remote: &MemoryRemote, storage: &Arc<MemoryStorage>, batch_size: usize) -> u64 {
    runtime().block_on(async {
        let registry = ReplicationRegistry::new();
        let (state, _events) = start_session(
            &registry,
            storage.clone(),
            Arc::new(remote.clone()),
            one_shot_config("remote")
                .pull_only()
                .with_pull_batch_size(batch_size),
        );
        assert_eq!(state.await_completion().await, ReplicationStatus::Completed);
        state.stats().pulled
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Many documents sharing one `updated_at` are each pulled exactly once,
    /// whatever the batch size.
    #[test]
    fn equal_timestamps_pull_every_document_once(
        count in 1usize..40,
        stamps in 1i64..4,
        batch_size in 1usize..9,
    ) {
        let remote = MemoryRemote::new();
        for n in 0..count {
            remote.write_at(todo_id(n), Value::object([("n", n as i64)]), n as i64 % stamps);
        }
        let storage = Arc::new(MemoryStorage::new("todos"));

        let pulled = pull_once(&remote, &storage, batch_size);
        prop_assert_eq!(pulled, count as u64);
        prop_assert_eq!(storage.count().unwrap(), count);
    }

    /// After any remote history, local state matches the remote and a
    /// second pass applies nothing.
    #[test]
    fn pulling_converges_and_is_idempotent(
        ops in remote_ops_strategy(8, 30),
        batch_size in 1usize..6,
    ) {
        let remote = MemoryRemote::new();
        for op in &ops {
            match op {
                RemoteOp::Write { id, body } => {
                    remote.write(id.as_str(), body.clone());
                }
                RemoteOp::Delete { id } => {
                    remote.delete(id.as_str());
                }
            }
        }
        let storage = Arc::new(MemoryStorage::new("todos"));

        pull_once(&remote, &storage, batch_size);
        let expected: BTreeMap<String, Value> = remote
            .documents()
            .into_iter()
            .filter(|d| !d.deleted)
            .map(|d| (d.id.to_string(), d.data))
            .collect();
        let local: BTreeMap<String, Value> = live_documents(storage.as_ref()).into_iter().collect();
        prop_assert_eq!(local, expected);

        prop_assert_eq!(pull_once(&remote, &storage, batch_size), 0);
    }
}

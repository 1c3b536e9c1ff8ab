//! Fixtures for replication tests.
//!
//! Storage seeded with todo documents, remotes seeded the same way, and
//! helpers for reading what a session emitted.

use std::sync::{Arc, Once};
use std::time::Duration;

use ferrydb_codec::Value;
use ferrydb_replication::{
    ReplicationConfig, ReplicationEvent, ReplicationRegistry, ReplicationState,
    ReplicationTransport, RetryConfig,
};
use ferrydb_storage::{DocumentStorage, MemoryStorage};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::remote::MemoryRemote;

/// A todo document body.
pub fn todo(title: &str, done: bool) -> Value {
    Value::object([("title", Value::from(title)), ("done", Value::from(done))])
}

/// Id of the `n`th seeded document.
pub fn todo_id(n: usize) -> String {
    format!("todo-{n:04}")
}

/// Storage named `name` holding `count` todos written locally.
pub fn seeded_storage(name: &str, count: usize) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new(name));
    for n in 0..count {
        storage
            .upsert(todo_id(n).into(), todo(&format!("local {n}"), false))
            .expect("seed local document");
    }
    storage
}

/// Remote holding `count` todos.
pub fn seeded_remote(count: usize) -> MemoryRemote {
    let remote = MemoryRemote::new();
    for n in 0..count {
        remote.write(todo_id(n), todo(&format!("remote {n}"), n % 2 == 0));
    }
    remote
}

/// One-shot config with a short fixed retry delay.
pub fn one_shot_config(identifier: &str) -> ReplicationConfig {
    ReplicationConfig::new(identifier)
        .with_live(false)
        .with_retry(RetryConfig::fixed(Duration::from_millis(5)))
}

/// Live config with a short fixed retry delay and a long live interval, so
/// rounds only run when a test triggers them.
pub fn live_config(identifier: &str) -> ReplicationConfig {
    ReplicationConfig::new(identifier)
        .with_live_interval(Duration::from_secs(3600))
        .with_retry(RetryConfig::fixed(Duration::from_millis(5)))
}

/// Start a session over `transport` and return it with an event stream
/// subscribed before the first round.
pub fn start_session<T: ReplicationTransport>(
    registry: &Arc<ReplicationRegistry>,
    storage: Arc<dyn DocumentStorage>,
    transport: Arc<T>,
    config: ReplicationConfig,
) -> (ReplicationState<T>, UnboundedReceiver<ReplicationEvent>) {
    let state = ReplicationState::new(registry, storage, transport, config.with_auto_start(false))
        .expect("create replication session");
    let events = state.events();
    state.start().expect("start replication session");
    (state, events)
}

/// Every event already queued on `events`.
pub fn drain_events(events: &mut UnboundedReceiver<ReplicationEvent>) -> Vec<ReplicationEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Live local documents as `(id, data)`, in id order.
pub fn live_documents(storage: &dyn DocumentStorage) -> Vec<(String, Value)> {
    storage
        .all()
        .expect("read local documents")
        .into_iter()
        .map(|d| (d.id.to_string(), d.data))
        .collect()
}

/// Install a test tracing subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

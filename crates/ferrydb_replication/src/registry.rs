//! Registry of running sessions.
//!
//! A registry enforces one session per `(collection, endpoint)` and lets a
//! host stop every session of a collection, or all of them, on shutdown.
//! It is an ordinary value passed to [`ReplicationState::new`](crate::ReplicationState::new).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::endpoint::EndpointHash;
use crate::error::{ReplicationError, ReplicationResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    collection: String,
    endpoint: EndpointHash,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    cancel: CancellationToken,
}

/// Tracks live replication sessions.
#[derive(Debug, Default)]
pub struct ReplicationRegistry {
    sessions: Mutex<HashMap<SessionKey, Entry>>,
    next_id: AtomicU64,
}

impl ReplicationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `(collection, endpoint)` for a session cancelled through `cancel`.
    pub(crate) fn register(
        registry: &Arc<Self>,
        collection: &str,
        endpoint: &EndpointHash,
        cancel: CancellationToken,
    ) -> ReplicationResult<Registration> {
        let key = SessionKey {
            collection: collection.to_string(),
            endpoint: endpoint.clone(),
        };
        let mut sessions = registry.sessions.lock();
        if sessions.contains_key(&key) {
            return Err(ReplicationError::DuplicateSession {
                collection: key.collection,
                endpoint: key.endpoint.to_string(),
            });
        }
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(key.clone(), Entry { id, cancel });
        Ok(Registration {
            registry: Arc::clone(registry),
            key,
            id,
        })
    }

    /// Whether a session holds `(collection, endpoint)`.
    pub fn is_registered(&self, collection: &str, endpoint: &EndpointHash) -> bool {
        self.sessions
            .lock()
            .keys()
            .any(|k| k.collection == collection && &k.endpoint == endpoint)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Cancel every session replicating `collection`. Returns how many.
    pub fn cancel_collection(&self, collection: &str) -> usize {
        let sessions = self.sessions.lock();
        let mut cancelled = 0;
        for (key, entry) in sessions.iter() {
            if key.collection == collection {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        debug!(collection, cancelled, "cancelled collection sessions");
        cancelled
    }

    /// Cancel every session. Returns how many.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.sessions.lock();
        for entry in sessions.values() {
            entry.cancel.cancel();
        }
        sessions.len()
    }

    fn release(&self, key: &SessionKey, id: u64) {
        let mut sessions = self.sessions.lock();
        if sessions.get(key).is_some_and(|entry| entry.id == id) {
            sessions.remove(key);
        }
    }
}

/// Holds a registry slot; releases it on drop.
#[derive(Debug)]
pub(crate) struct Registration {
    registry: Arc<ReplicationRegistry>,
    key: SessionKey,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

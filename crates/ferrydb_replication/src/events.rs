//! Replication events.
//!
//! Every session owns an [`EventBus`]. Engines and the orchestrator publish
//! into it without waiting for consumers; each subscriber receives every
//! event published after it subscribed, in publication order. Subscribers
//! that dropped their stream are pruned on the next publish.

use ferrydb_storage::Document;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::ReplicationError;
use crate::state::ReplicationStatus;
use crate::transport::RemoteDocument;

/// Which way a document travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Remote to local.
    Pull,
    /// Local to remote.
    Push,
}

/// Something that happened in a replication session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// A round started (`true`) or finished (`false`).
    Active(bool),
    /// The remote delivered a document, before it is applied.
    Received(RemoteDocument),
    /// A document was written locally (pull) or accepted remotely (push).
    Change {
        /// Direction of travel.
        direction: Direction,
        /// The document state.
        document: Document,
    },
    /// The remote refused a pushed document.
    Denied {
        /// The refused state.
        document: Document,
        /// Remote explanation.
        reason: String,
    },
    /// A round failed; the session will retry.
    Error(ReplicationError),
    /// Whether the remote is reachable, emitted when it flips.
    Alive(bool),
    /// The session moved to a new lifecycle state.
    Status(ReplicationStatus),
    /// A one-shot session replicated everything.
    Complete,
    /// The session stopped because it was cancelled.
    Canceled,
}

/// Receiving half of a subscription.
pub type EventStream = UnboundedReceiver<ReplicationEvent>;

/// Fan-out of session events.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<UnboundedSender<ReplicationEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publish to all live subscribers.
    pub fn emit(&self, event: ReplicationEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(ReplicationEvent::Active(true));
        bus.emit(ReplicationEvent::Active(false));

        for stream in [&mut a, &mut b] {
            assert_eq!(stream.try_recv().unwrap(), ReplicationEvent::Active(true));
            assert_eq!(stream.try_recv().unwrap(), ReplicationEvent::Active(false));
        }
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.emit(ReplicationEvent::Complete);
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.emit(ReplicationEvent::Alive(true));
        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
    }
}

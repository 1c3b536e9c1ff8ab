//! Live change notifications.
//!
//! Every committed write is pushed to all subscribers in commit order.
//! Closing the storage drops the senders, so a subscriber sees its stream
//! end and can tell the storage went away.

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::document::Document;

/// Where a committed write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// [`DocumentStorage::upsert`](crate::DocumentStorage::upsert) or
    /// [`DocumentStorage::remove`](crate::DocumentStorage::remove).
    Local,
    /// [`DocumentStorage::bulk_write`](crate::DocumentStorage::bulk_write).
    Bulk,
}

/// A committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Sequence assigned to the write.
    pub sequence: u64,
    /// The document state after the write.
    pub document: Document,
    /// Which write path produced it.
    pub origin: WriteOrigin,
}

/// Receiving half of a storage subscription.
pub type ChangeStream = UnboundedReceiver<ChangeEvent>;

/// Fan-out of committed writes to subscribers.
#[derive(Debug, Default)]
pub(crate) struct ChangeFeed {
    subscribers: RwLock<Vec<UnboundedSender<ChangeEvent>>>,
}

impl ChangeFeed {
    pub(crate) fn subscribe(&self) -> ChangeStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping the ones that hung up.
    pub(crate) fn emit(&self, event: &ChangeEvent) {
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// End every stream.
    pub(crate) fn close(&self) {
        self.subscribers.write().clear();
    }
}

//! Transport abstraction between the engines and a remote.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use ferrydb_codec::Value;
use ferrydb_storage::{Document, DocumentId, Revision};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::cursor::{ReplicationCursor, UpdatedAtCursor};
use crate::error::ReplicationResult;

/// A document state as delivered by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    /// Primary key.
    pub id: DocumentId,
    /// Document body.
    pub data: Value,
    /// Whether the remote deleted the document.
    pub deleted: bool,
}

impl RemoteDocument {
    /// A live remote document.
    pub fn live(id: impl Into<DocumentId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            deleted: false,
        }
    }

    /// A remote deletion.
    pub fn deleted(id: impl Into<DocumentId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            deleted: true,
        }
    }
}

/// Response to a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullBatch<C> {
    /// Entries in cursor order.
    pub documents: Vec<RemoteDocument>,
    /// Cursor of the last entry; `None` only when nothing was returned.
    pub cursor: Option<C>,
}

impl<C> PullBatch<C> {
    /// A batch with no entries.
    pub fn empty() -> Self {
        Self {
            documents: Vec::new(),
            cursor: None,
        }
    }
}

/// A local document state offered to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRow {
    /// Primary key.
    pub id: DocumentId,
    /// Document body.
    pub data: Value,
    /// Whether the document was deleted locally.
    pub deleted: bool,
    /// Local revision of the state.
    pub revision: Revision,
}

impl From<&Document> for PushRow {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            data: document.data.clone(),
            deleted: document.deleted,
            revision: document.revision.clone(),
        }
    }
}

/// Remote verdict on one pushed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote stored the row.
    Accepted {
        /// Document id.
        id: DocumentId,
    },
    /// The remote refused the row because it holds a conflicting state.
    Conflict {
        /// Document id.
        id: DocumentId,
        /// Remote explanation.
        reason: String,
    },
}

impl PushOutcome {
    /// Id of the row this outcome is for.
    pub fn id(&self) -> &DocumentId {
        match self {
            Self::Accepted { id } | Self::Conflict { id, .. } => id,
        }
    }
}

/// Network side of a replication session.
///
/// Implementations translate these calls into whatever protocol the remote
/// speaks. Errors should be [`ReplicationError::Transport`](crate::ReplicationError::Transport);
/// the engine retries them.
///
/// Futures returned by a transport may be dropped at any await point when the
/// session is cancelled.
pub trait ReplicationTransport: Send + Sync + 'static {
    /// Position type of the remote change feed.
    type Cursor: ReplicationCursor;

    /// Up to `batch_size` entries strictly after `cursor`, in cursor order.
    /// `None` means from the beginning.
    fn pull(
        &self,
        cursor: Option<&Self::Cursor>,
        batch_size: usize,
    ) -> impl Future<Output = ReplicationResult<PullBatch<Self::Cursor>>> + Send;

    /// Offer rows to the remote. Rows without a matching outcome are treated
    /// as accepted.
    fn push(
        &self,
        rows: Vec<PushRow>,
    ) -> impl Future<Output = ReplicationResult<Vec<PushOutcome>>> + Send;
}

/// A scripted transport for tests.
///
/// Pull responses are served from a queue; once it is empty every pull
/// returns an empty batch. Pushes are recorded and accepted unless a
/// response has been queued for them. A gated mock waits for one
/// `notify_one` permit per call before answering.
#[derive(Debug, Default)]
pub struct MockTransport {
    gate: Option<Arc<Notify>>,
    pulls: Mutex<VecDeque<ReplicationResult<PullBatch<UpdatedAtCursor>>>>,
    push_responses: Mutex<VecDeque<ReplicationResult<Vec<PushOutcome>>>>,
    pull_requests: Mutex<Vec<Option<UpdatedAtCursor>>>,
    pushed: Mutex<Vec<Vec<PushRow>>>,
}

impl MockTransport {
    /// Creates a mock with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every call until `gate` hands out a permit.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }

    /// Queue the response for the next pull.
    pub fn queue_pull(&self, response: ReplicationResult<PullBatch<UpdatedAtCursor>>) {
        self.pulls.lock().push_back(response);
    }

    /// Queue the response for the next push.
    pub fn queue_push(&self, response: ReplicationResult<Vec<PushOutcome>>) {
        self.push_responses.lock().push_back(response);
    }

    /// Cursors passed to each pull so far.
    pub fn pull_requests(&self) -> Vec<Option<UpdatedAtCursor>> {
        self.pull_requests.lock().clone()
    }

    /// Rows of each push so far.
    pub fn pushed(&self) -> Vec<Vec<PushRow>> {
        self.pushed.lock().clone()
    }
}

impl ReplicationTransport for MockTransport {
    type Cursor = UpdatedAtCursor;

    async fn pull(
        &self,
        cursor: Option<&UpdatedAtCursor>,
        _batch_size: usize,
    ) -> ReplicationResult<PullBatch<UpdatedAtCursor>> {
        self.pull_requests.lock().push(cursor.cloned());
        self.pass_gate().await;
        self.pulls
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullBatch::empty()))
    }

    async fn push(&self, rows: Vec<PushRow>) -> ReplicationResult<Vec<PushOutcome>> {
        let accepted = rows
            .iter()
            .map(|row| PushOutcome::Accepted { id: row.id.clone() })
            .collect();
        self.pushed.lock().push(rows);
        self.pass_gate().await;
        self.push_responses
            .lock()
            .pop_front()
            .unwrap_or(Ok(accepted))
    }
}

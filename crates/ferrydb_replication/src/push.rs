//! Push engine: local changes out to the remote.

use std::collections::HashMap;
use std::sync::Arc;

use ferrydb_storage::{ChangeRow, DocumentId, DocumentStorage};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checkpoint::CheckpointStore;
use crate::error::{ReplicationError, ReplicationResult};
use crate::events::{Direction, EventBus, ReplicationEvent};
use crate::revision::RevisionTagger;
use crate::transport::{PushOutcome, PushRow, ReplicationTransport};

/// What one push batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Feed rows read, including skipped ones.
    pub scanned: usize,
    /// Rows skipped because they came from this endpoint.
    pub skipped: usize,
    /// Rows the remote accepted.
    pub pushed: usize,
    /// Rows the remote refused.
    pub denied: usize,
    /// Whether local writes remain past the checkpoint.
    pub has_more: bool,
}

/// Uploads local changes since the push checkpoint.
pub struct PushEngine<T: ReplicationTransport> {
    transport: Arc<T>,
    storage: Arc<dyn DocumentStorage>,
    checkpoints: CheckpointStore,
    tagger: RevisionTagger,
    events: Arc<EventBus>,
    batch_size: usize,
}

impl<T: ReplicationTransport> PushEngine<T> {
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

    /// Push one batch.
    ///
    /// Rows pulled from this endpoint are skipped. The checkpoint moves past
    /// every scanned row once the remote has answered, including refused
    /// rows; a failed or cancelled upload leaves it where it was.
    pub async fn run_batch(&self, cancel: &CancellationToken) -> ReplicationResult<PushReport> {
        if cancel.is_cancelled() {
            return Err(ReplicationError::Cancelled);
        }
        let since = self.checkpoints.push_checkpoint()?;
        let (rows, scanned_to, scanned) = self.collect(since)?;
        let skipped = scanned - rows.len();

        let mut report = PushReport {
            scanned,
            skipped,
            ..PushReport::default()
        };

        if !rows.is_empty() {
            let upload: Vec<PushRow> = rows
                .iter()
                .map(|row| PushRow::from(&row.document))
                .collect();
            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReplicationError::Cancelled),
                result = self.transport.push(upload) => result?,
            };
            if cancel.is_cancelled() {
                return Err(ReplicationError::Cancelled);
            }

            let mut verdicts: HashMap<DocumentId, PushOutcome> = outcomes
                .into_iter()
                .map(|outcome| (outcome.id().clone(), outcome))
                .collect();
            for row in rows {
                match verdicts.remove(&row.document.id) {
                    Some(PushOutcome::Conflict { reason, .. }) => {
                        report.denied += 1;
                        self.events.emit(ReplicationEvent::Denied {
                            document: row.document,
                            reason,
                        });
                    }
                    Some(PushOutcome::Accepted { .. }) | None => {
                        report.pushed += 1;
                        self.events.emit(ReplicationEvent::Change {
                            direction: Direction::Push,
                            document: row.document,
                        });
                    }
                }
            }
        }

        if scanned_to > since {
            self.checkpoints.set_push_checkpoint(scanned_to)?;
        }
        report.has_more = scanned_to < self.storage.max_sequence()?;

        debug!(
            collection = self.storage.name(),
            since,
            scanned_to,
            pushed = report.pushed,
            denied = report.denied,
            skipped = report.skipped,
            "pushed batch"
        );
        Ok(report)
    }

    /// Read the feed after `since` until `batch_size` pushable rows are found
    /// or the feed ends. Returns the rows, the last scanned sequence and the
    /// number of rows scanned.
    fn collect(&self, since: u64) -> ReplicationResult<(Vec<ChangeRow>, u64, usize)> {
        let mut rows = Vec::with_capacity(self.batch_size);
        let mut scanned_to = since;
        let mut scanned = 0;
        loop {
            let wanted = self.batch_size - rows.len();
            let page = self.storage.changes_since(scanned_to, wanted)?;
            let page_full = page.changes.len() == wanted;
            scanned_to = page.last_sequence;
            scanned += page.changes.len();
            rows.extend(
                page.changes
                    .into_iter()
                    .filter(|row| !self.tagger.is_tagged_as_pulled(&row.document.revision)),
            );
            if !page_full || rows.len() == self.batch_size {
                return Ok((rows, scanned_to, scanned));
            }
        }
    }
}

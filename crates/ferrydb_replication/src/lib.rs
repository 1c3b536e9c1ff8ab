//! # FerryDB Replication
//!
//! Checkpoint-based replication between a local collection and a remote
//! endpoint.
//!
//! A session pulls remote changes in cursor order and pushes local writes in
//! storage-sequence order. Both directions persist their progress as local
//! checkpoint documents keyed by an endpoint hash, so a restarted session
//! resumes where it stopped.
//!
//! ## Architecture
//!
//! - [`ReplicationTransport`]: the remote, supplied by the host. Pull takes a
//!   cursor and returns the next page; push uploads rows and reports
//!   conflicts per row.
//! - [`PullEngine`] / [`PushEngine`]: one batch of one direction each.
//! - [`ReplicationState`]: the session. Runs rounds on a tokio task, retries
//!   failed rounds with [`RetryConfig`] backoff and, in live mode, waits for
//!   local writes, [`ReplicationState::run`] or the live interval.
//! - [`ReplicationRegistry`]: at most one session per collection and
//!   endpoint.
//!
//! ## Key Invariants
//!
//! - Documents pulled from an endpoint carry a revision tagged with that
//!   endpoint and are never pushed back to it.
//! - A checkpoint moves only after its batch has been applied (pull) or
//!   answered (push).
//! - Re-applying a batch that is already stored changes nothing.
//!
//! ## Logging
//!
//! The crate logs through `tracing`: lifecycle transitions at `info`,
//! batches at `debug`, failed rounds at `warn` or `error`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod cursor;
mod endpoint;
mod error;
mod events;
mod pull;
mod push;
mod registry;
mod revision;
mod state;
mod transport;

pub use checkpoint::CheckpointStore;
pub use config::{PullOptions, PushOptions, ReplicationConfig, RetryConfig, DEFAULT_BATCH_SIZE};
pub use cursor::{ReplicationCursor, UpdatedAtCursor};
pub use endpoint::EndpointHash;
pub use error::{ReplicationError, ReplicationResult};
pub use events::{Direction, EventBus, EventStream, ReplicationEvent};
pub use pull::{PullEngine, PullReport};
pub use push::{PushEngine, PushReport};
pub use registry::ReplicationRegistry;
pub use revision::RevisionTagger;
pub use state::{ReplicationState, ReplicationStats, ReplicationStatus};
pub use transport::{
    MockTransport, PullBatch, PushOutcome, PushRow, RemoteDocument, ReplicationTransport,
};

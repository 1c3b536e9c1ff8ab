//! # FerryDB Storage
//!
//! The document storage contract replication runs against, and an in-memory
//! implementation of it.
//!
//! A collection stores [`Document`]s keyed by [`DocumentId`]. Every write
//! is assigned a sequence number, and [`DocumentStorage::changes_since`]
//! pages through the latest state of each document in sequence order.
//! Deletions are kept as tombstones so they travel through that feed.
//!
//! Two write paths exist:
//!
//! - [`DocumentStorage::upsert`] and [`DocumentStorage::remove`] are
//!   application writes; storage generates the revision.
//! - [`DocumentStorage::bulk_write`] stores documents with revisions chosen
//!   by the caller and is atomic; replication uses it to apply pulled data.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod document;
mod error;
mod feed;
mod memory;
mod validator;

pub use backend::DocumentStorage;
pub use document::{content_digest, ChangeRow, ChangesPage, Document, DocumentId, Revision};
pub use error::{StorageError, StorageResult};
pub use feed::{ChangeEvent, ChangeStream, WriteOrigin};
pub use memory::MemoryStorage;
pub use validator::{DocumentValidator, RequiredFields};

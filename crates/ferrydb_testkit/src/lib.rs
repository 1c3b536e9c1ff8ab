//! # FerryDB Testkit
//!
//! Test utilities for FerryDB replication.
//!
//! This crate provides:
//! - [`MemoryRemote`], an in-memory remote endpoint with cursor paging and
//!   optional last-writer-wins conflicts
//! - [`FlakyTransport`], which fails a configurable number of calls
//! - Fixtures for seeded storage, remotes and sessions
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ferrydb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pulls_everything() {
//!     let remote = Arc::new(seeded_remote(20));
//!     let storage = Arc::new(MemoryStorage::new("todos"));
//!     let (state, _events) =
//!         start_session(&ReplicationRegistry::new(), storage, remote, one_shot_config("r"));
//!     state.await_completion().await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::*;

//! CLI command implementations.

pub mod endpoint_hash;
pub mod simulate;

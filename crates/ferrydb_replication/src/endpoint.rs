//! Endpoint identity.

use std::fmt;

use sha2::{Digest, Sha256};

/// Stable identity of a remote endpoint as seen from one collection.
///
/// All checkpoint documents and pulled-document markers are scoped by this
/// hash, so it must not change between runs for the same remote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointHash(String);

impl EndpointHash {
    /// Hex SHA-256 of `parts` joined with `|`.
    pub fn derive<S: AsRef<str>>(parts: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(b"|");
            }
            hasher.update(part.as_ref().as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for EndpointHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

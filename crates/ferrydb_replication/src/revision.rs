//! Pulled-document revision markers.
//!
//! A document written by the pull engine gets a revision whose hash part is
//!
//! ```text
//! <16 hex: sha256(endpoint ‖ content digest)><24 hex: endpoint prefix>rpl
//! ```
//!
//! The suffix identifies the endpoint the state came from, which lets the
//! push engine skip it. The leading digest depends only on endpoint and
//! content, so pulling the same remote state twice yields the same revision
//! hash and the second write can be skipped.

use ferrydb_codec::Value;
use ferrydb_storage::{content_digest, Revision};
use sha2::{Digest, Sha256};

use crate::endpoint::EndpointHash;
use crate::error::ReplicationResult;

const CONTENT_LEN: usize = 16;
const ENDPOINT_LEN: usize = 24;
const MARKER: &str = "rpl";

/// Computes and recognises the marker of one endpoint.
#[derive(Debug, Clone)]
pub struct RevisionTagger {
    endpoint: EndpointHash,
    suffix: String,
}

impl RevisionTagger {
    /// Tagger for `endpoint`.
    pub fn new(endpoint: &EndpointHash) -> Self {
        Self {
            suffix: format!("{}{MARKER}", &endpoint.as_str()[..ENDPOINT_LEN]),
            endpoint: endpoint.clone(),
        }
    }

    /// Revision for a state pulled from this endpoint.
    ///
    /// The height continues from `previous`, the revision currently stored
    /// for the document.
    pub fn tag_as_pulled(
        &self,
        data: &Value,
        deleted: bool,
        previous: Option<&Revision>,
    ) -> ReplicationResult<Revision> {
        let mut hasher = Sha256::new();
        hasher.update(self.endpoint.as_str().as_bytes());
        hasher.update(content_digest(data, deleted));
        let digest = hex::encode(hasher.finalize());

        let hash = format!("{}{}", &digest[..CONTENT_LEN], self.suffix);
        let height = previous.map_or(1, |rev| rev.height() + 1);
        Ok(Revision::new(height, hash)?)
    }

    /// True if `revision` was written by a pull from this endpoint.
    pub fn is_tagged_as_pulled(&self, revision: &Revision) -> bool {
        revision.hash().ends_with(&self.suffix)
    }
}

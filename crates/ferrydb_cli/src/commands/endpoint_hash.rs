//! Endpoint-hash command implementation.

use ferrydb_replication::EndpointHash;

/// Prints the endpoint hash a session for `collection` and `identifier`
/// in `database` would use.
pub fn run(database: &str, collection: &str, identifier: &str) {
    let endpoint = EndpointHash::derive(&[database, collection, identifier]);
    println!("{endpoint}");
}

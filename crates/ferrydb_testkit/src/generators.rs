//! Property-based test generators using proptest.

use ferrydb_codec::Value;
use proptest::prelude::*;

/// Strategy for document ids drawn from a small pool, so that writes
/// collide often.
pub fn document_id_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|n| format!("doc-{n:03}"))
}

/// Strategy for scalar values the codec accepts.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z ]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Strategy for nested document values up to depth 3.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,6}", inner), 0..4)
                .prop_map(|fields| Value::object(fields)),
        ]
    })
}

/// Strategy for document bodies: a map with a `title` and a `version`.
pub fn document_body_strategy() -> impl Strategy<Value = Value> {
    ("[a-z]{1,10}", 0i64..1000, prop::option::of(value_strategy())).prop_map(
        |(title, version, extra)| {
            let body = Value::object([
                ("title", Value::from(title)),
                ("version", Value::from(version)),
            ]);
            match extra {
                Some(extra) => body.with_field("extra", extra),
                None => body,
            }
        },
    )
}

/// One remote-side operation.
#[derive(Debug, Clone)]
pub enum RemoteOp {
    /// Write `body` to `id`.
    Write {
        /// Target id.
        id: String,
        /// New body.
        body: Value,
    },
    /// Delete `id` if present.
    Delete {
        /// Target id.
        id: String,
    },
}

/// Strategy for a sequence of remote writes and deletes over `pool` ids.
pub fn remote_ops_strategy(pool: usize, max_ops: usize) -> impl Strategy<Value = Vec<RemoteOp>> {
    let op = prop_oneof![
        4 => (document_id_strategy(pool), document_body_strategy())
            .prop_map(|(id, body)| RemoteOp::Write { id, body }),
        1 => document_id_strategy(pool).prop_map(|id| RemoteOp::Delete { id }),
    ];
    prop::collection::vec(op, 1..max_ops.max(2))
}

//! # FerryDB Codec
//!
//! Document values and their canonical CBOR form.
//!
//! Replication relies on byte-identical encodings: revision hashes and the
//! pulled-document marker are digests over these bytes, so two replicas that
//! hold the same document must produce the same encoding.
//!
//! ## Canonical rules
//!
//! - Map keys sorted by encoded key, shorter first, then bytewise
//! - Integers and lengths in shortest form
//! - Definite lengths only
//! - No floats, no tags
//!
//! ```
//! use ferrydb_codec::{from_canonical_bytes, to_canonical_bytes, Value};
//!
//! let doc = Value::object([("title", Value::from("milk")), ("done", Value::from(false))]);
//! let bytes = to_canonical_bytes(&doc);
//! assert_eq!(from_canonical_bytes(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decode;
mod encode;
mod error;
mod value;

pub use decode::from_canonical_bytes;
pub use encode::to_canonical_bytes;
pub use error::{CodecError, CodecResult};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
            "[a-z]{0,6}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::vec(("[a-z]{1,4}", inner), 0..4)
                    .prop_map(|fields| Value::object(fields)),
            ]
        })
    }

    proptest! {
        #[test]
        fn canonical_bytes_decode_to_same_value(value in arb_value()) {
            let bytes = to_canonical_bytes(&value);
            prop_assert_eq!(from_canonical_bytes(&bytes).unwrap(), value);
        }

        #[test]
        fn field_order_never_changes_bytes(
            fields in proptest::collection::btree_map("[a-z]{1,4}", any::<i64>(), 0..6)
        ) {
            let forward: Vec<_> = fields.iter().map(|(k, v)| (k.clone(), *v)).collect();
            let mut backward = forward.clone();
            backward.reverse();
            prop_assert_eq!(
                to_canonical_bytes(&Value::object(forward)),
                to_canonical_bytes(&Value::object(backward))
            );
        }
    }
}

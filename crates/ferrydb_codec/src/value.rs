//! Dynamic document value.

use std::cmp::Ordering;

use crate::encode::to_canonical_bytes;
use crate::error::{CodecError, CodecResult};

/// A document value.
///
/// This is the data model of every document stored or replicated by FerryDB.
/// It mirrors the subset of CBOR that has a single canonical encoding, so
/// floats are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Ordered list.
    Array(Vec<Value>),
    /// Key/value pairs, kept in canonical key order when built with [`Value::map`].
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Build a map value, sorting keys into canonical order.
    ///
    /// Later duplicates of a key replace earlier ones.
    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut keyed: Vec<(Vec<u8>, Value, Value)> = Vec::new();
        for (key, value) in pairs {
            let encoded = to_canonical_bytes(&key);
            match keyed.iter_mut().find(|(bytes, _, _)| *bytes == encoded) {
                Some(slot) => slot.2 = value,
                None => keyed.push((encoded, key, value)),
            }
        }
        keyed.sort_by(|a, b| canonical_key_order(&a.0, &b.0));
        Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect())
    }

    /// Build a map value from text keys.
    pub fn object<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::map(
            fields
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v.into())),
        )
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The text, if this is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The bytes, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The elements, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, if this is a map.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Look up a text key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }

    /// Return a copy of this map with `key` set to `value`.
    ///
    /// Non-map values are replaced by a single-entry map.
    pub fn with_field(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut pairs = self.as_map().map(<[_]>::to_vec).unwrap_or_default();
        pairs.push((Value::Text(key.to_string()), value.into()));
        Self::map(pairs)
    }

    /// Convert a JSON value.
    ///
    /// Integers must fit in `i64`; any fractional or out-of-range number is
    /// rejected with [`CodecError::FloatForbidden`].
    pub fn from_json(json: &serde_json::Value) -> CodecResult<Self> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                Value::Integer(n.as_i64().ok_or(CodecError::FloatForbidden)?)
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<CodecResult<_>>()?,
            ),
            serde_json::Value::Object(fields) => {
                let mut pairs = Vec::with_capacity(fields.len());
                for (k, v) in fields {
                    pairs.push((Value::Text(k.clone()), Value::from_json(v)?));
                }
                Value::map(pairs)
            }
        })
    }

    /// Render as JSON.
    ///
    /// Byte strings become lowercase hex text and non-text map keys are
    /// rendered through their JSON form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Bytes(b) => {
                serde_json::Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect())
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(pairs) => {
                let mut object = serde_json::Map::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = match k {
                        Value::Text(s) => s.clone(),
                        other => other.to_json().to_string(),
                    };
                    object.insert(key, v.to_json());
                }
                serde_json::Value::Object(object)
            }
        }
    }
}

/// Canonical ordering of encoded map keys: shorter first, then bytewise.
pub(crate) fn canonical_key_order(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_sorts_shorter_keys_first() {
        let value = Value::object([("title", 1), ("id", 2), ("a", 3)]);
        let keys: Vec<_> = value
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_text().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "id", "title"]);
    }

    #[test]
    fn map_last_duplicate_wins() {
        let value = Value::object([("k", 1), ("k", 2)]);
        assert_eq!(value.as_map().unwrap().len(), 1);
        assert_eq!(value.get("k"), Some(&Value::Integer(2)));
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = Value::object([("x", 1), ("y", 2)]);
        let b = Value::object([("y", 2), ("x", 1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn with_field_replaces_existing() {
        let doc = Value::object([("done", false)]);
        let updated = doc.with_field("done", true);
        assert_eq!(updated.get("done"), Some(&Value::Bool(true)));
        assert_eq!(doc.get("done"), Some(&Value::Bool(false)));
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!({"id": "a", "n": -4, "tags": ["x"], "ok": true, "none": null});
        let value = Value::from_json(&json).unwrap();
        assert_eq!(value.get("n"), Some(&Value::Integer(-4)));
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn json_floats_rejected() {
        let json = serde_json::json!({"price": 1.5});
        assert_eq!(Value::from_json(&json), Err(CodecError::FloatForbidden));
    }

    #[test]
    fn bytes_render_as_hex() {
        assert_eq!(
            Value::Bytes(vec![0x0a, 0xff]).to_json(),
            serde_json::json!("0aff")
        );
    }
}

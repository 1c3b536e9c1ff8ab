//! Pull cursors.

use std::fmt::Debug;

use ferrydb_codec::Value;
use ferrydb_storage::DocumentId;

/// Position in a remote change feed.
///
/// Cursors are totally ordered: the remote returns entries strictly after a
/// cursor, and the engine never stores a cursor that orders before the one
/// already committed.
pub trait ReplicationCursor: Ord + Clone + Debug + Send + Sync + 'static {
    /// Encode for storage in a checkpoint document.
    fn to_value(&self) -> Value;

    /// Decode from a checkpoint document.
    fn from_value(value: &Value) -> Option<Self>;
}

impl ReplicationCursor for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_integer()
    }
}

/// Cursor over a feed ordered by modification time, ties broken by id.
///
/// Field order matters: the derived `Ord` compares `updated_at` first and
/// `id` second, which gives every document a distinct position even when
/// many share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdatedAtCursor {
    /// Remote modification time.
    pub updated_at: i64,
    /// Document id, the tie-breaker.
    pub id: DocumentId,
}

impl UpdatedAtCursor {
    /// Creates a cursor.
    pub fn new(updated_at: i64, id: impl Into<DocumentId>) -> Self {
        Self {
            updated_at,
            id: id.into(),
        }
    }
}

impl ReplicationCursor for UpdatedAtCursor {
    fn to_value(&self) -> Value {
        Value::object([
            ("updated_at", Value::Integer(self.updated_at)),
            ("id", Value::Text(self.id.to_string())),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            updated_at: value.get("updated_at")?.as_integer()?,
            id: value.get("id")?.as_text()?.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_ordered_by_id() {
        let a = UpdatedAtCursor::new(10, "a");
        let b = UpdatedAtCursor::new(10, "b");
        let later = UpdatedAtCursor::new(11, "a");
        assert!(a < b);
        assert!(b < later);
    }

    #[test]
    fn value_form() {
        let cursor = UpdatedAtCursor::new(42, "doc-7");
        let value = cursor.to_value();
        assert_eq!(value.get("updated_at"), Some(&Value::Integer(42)));
        assert_eq!(UpdatedAtCursor::from_value(&value), Some(cursor));
        assert_eq!(UpdatedAtCursor::from_value(&Value::Integer(1)), None);
    }

    #[test]
    fn integer_cursor() {
        assert_eq!(i64::from_value(&7i64.to_value()), Some(7));
        assert_eq!(i64::from_value(&Value::Null), None);
    }
}

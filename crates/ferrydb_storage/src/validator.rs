//! Document validation hook.

use ferrydb_codec::Value;

use crate::document::DocumentId;

/// Checks a document body before it is written.
///
/// Validators run for every live (non-deleted) write, local or replicated.
/// Tombstones are never validated.
pub trait DocumentValidator: Send + Sync {
    /// Returns a human-readable reason when `data` is not acceptable.
    fn validate(&self, id: &DocumentId, data: &Value) -> Result<(), String>;
}

impl<F> DocumentValidator for F
where
    F: Fn(&DocumentId, &Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, id: &DocumentId, data: &Value) -> Result<(), String> {
        self(id, data)
    }
}

/// Requires the body to be a map containing every listed field.
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    /// Require the given fields.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl DocumentValidator for RequiredFields {
    fn validate(&self, _id: &DocumentId, data: &Value) -> Result<(), String> {
        if data.as_map().is_none() {
            return Err("document body must be a map".to_string());
        }
        match self.fields.iter().find(|f| data.get(f).is_none()) {
            Some(missing) => Err(format!("missing required field '{missing}'")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_fields() {
        let validator = RequiredFields::new(["title"]);
        let id = DocumentId::from("a");
        assert!(validator
            .validate(&id, &Value::object([("title", "x")]))
            .is_ok());
        assert_eq!(
            validator.validate(&id, &Value::object([("done", true)])),
            Err("missing required field 'title'".to_string())
        );
        assert!(validator.validate(&id, &Value::Integer(1)).is_err());
    }

    #[test]
    fn closures_are_validators() {
        let no_negative = |_: &DocumentId, data: &Value| match data.get("n") {
            Some(Value::Integer(n)) if *n < 0 => Err("negative".to_string()),
            _ => Ok(()),
        };
        let id = DocumentId::from("a");
        assert!(no_negative.validate(&id, &Value::object([("n", 1)])).is_ok());
        assert!(no_negative.validate(&id, &Value::object([("n", -1)])).is_err());
    }
}

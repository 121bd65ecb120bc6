//! Raw provider records as handed over by a collector.
//!
//! Records are plain JSON objects. Every accessor answers "absent" explicitly
//! with `None` instead of guessing at the record's shape, so parsers can
//! substitute defaults for optional fields and skip records that lack an
//! identity.

use crate::error::{NimbusError, Result};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// A single raw provider record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, serde_json::Value>);

impl RawRecord {
    pub fn new(fields: Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    /// Build a record from a JSON value, which must be an object
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(fields) => Ok(Self(fields)),
            other => Err(NimbusError::internal(format!(
                "raw record must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Whether the field is present and not null
    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Field value; null counts as absent
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Nested lookup through objects, e.g. `["image", "id"]`
    pub fn path(&self, path: &[&str]) -> Option<&serde_json::Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.get(first)?;
        for segment in rest {
            current = current.get(segment).filter(|v| !v.is_null())?;
        }
        Some(current)
    }

    /// String field as-is (may be blank)
    pub fn str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|v| v.as_str())
    }

    /// Non-blank textual field; numbers are rendered as text
    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field).and_then(json_text)
    }

    /// Non-blank textual value at a nested path
    pub fn path_text(&self, path: &[&str]) -> Option<String> {
        self.path(path).and_then(json_text)
    }

    /// Integer field; numeric strings and floats are accepted
    pub fn i64(&self, field: &str) -> Option<i64> {
        match self.get(field)? {
            serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean field; "true"/"false" strings are accepted
    pub fn bool(&self, field: &str) -> Option<bool> {
        match self.get(field)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Field converted to an attribute value; absent fields become null
    pub fn value(&self, field: &str) -> Value {
        self.get(field).map(Value::from).unwrap_or_default()
    }

    /// Nested object field as a record
    pub fn record(&self, field: &str) -> Option<RawRecord> {
        match self.get(field)? {
            serde_json::Value::Object(fields) => Some(RawRecord(fields.clone())),
            _ => None,
        }
    }

    /// Nested array of objects; non-object entries are ignored
    pub fn records(&self, field: &str) -> Vec<RawRecord> {
        match self.get(field) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned().map(RawRecord))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// All fields in record order
    pub fn fields(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server() -> RawRecord {
        RawRecord::from_json(json!({
            "id": "s1",
            "name": "",
            "tenant_id": null,
            "flavor": {"id": 42},
            "ram": "2048",
            "locked": "TRUE",
            "volumes": [{"id": "v1"}, "junk", {"id": "v2"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_absent_and_null_fields() {
        let record = server();
        assert!(record.has("id"));
        assert!(!record.has("tenant_id"));
        assert!(!record.has("missing"));
        assert_eq!(record.str("name"), Some(""));
        assert_eq!(record.text("name"), None);
        assert!(record.value("tenant_id").is_null());
    }

    #[test]
    fn test_typed_accessors() {
        let record = server();
        assert_eq!(record.i64("ram"), Some(2048));
        assert_eq!(record.bool("locked"), Some(true));
        assert_eq!(record.path_text(&["flavor", "id"]), Some("42".to_string()));
        assert_eq!(record.path(&["flavor", "missing"]), None);
        assert_eq!(record.records("volumes").len(), 2);
        assert_eq!(record.record("flavor").unwrap().i64("id"), Some(42));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(RawRecord::from_json(json!([1, 2])).is_err());
    }
}

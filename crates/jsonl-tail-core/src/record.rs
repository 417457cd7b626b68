//! Record model: one JSON object per JSONL line.

use serde::{Deserialize, Serialize};

use crate::error::LineError;

pub use serde_json::Value;

/// A decoded JSONL line. Keys keep the order they had in the source text.
pub type Record = serde_json::Map<String, Value>;

/// Parse one trimmed, non-empty line into a [`Record`].
///
/// Only JSON objects are records. Other top-level values (arrays, scalars)
/// are rejected the same way malformed text is.
pub fn parse_record(line: &str) -> Result<Record, LineError> {
    match serde_json::from_str::<Value>(line)? {
        Value::Object(map) => Ok(map),
        other => Err(LineError::NotAnObject(value_kind(&other))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Columns ──────────────────────────────────────────────────────

/// Column set of a tailed view: the keys of the first record of a session.
///
/// Later records are projected onto these columns. Extra keys are not
/// displayed, missing keys render as empty cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Columns(Vec<String>);

impl Columns {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn from_record(record: &Record) -> Self {
        Self(record.keys().cloned().collect())
    }

    /// Columns of the first record, or an empty set when there is none.
    pub fn from_first(records: &[Record]) -> Self {
        records.first().map(Self::from_record).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_record_keeps_source_key_order() {
        let record = parse_record(r#"{"zeta":1,"alpha":2,"mid":{"b":1,"a":2}}"#).expect("test");
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);

        let nested = record["mid"].as_object().expect("test");
        let nested_keys: Vec<&str> = nested.keys().map(String::as_str).collect();
        assert_eq!(nested_keys, vec!["b", "a"]);
    }

    #[test]
    fn parse_record_rejects_non_objects() {
        for line in ["[1,2,3]", "42", "\"text\"", "null", "true"] {
            let err = parse_record(line).expect_err("non-object must be rejected");
            assert!(matches!(err, LineError::NotAnObject(_)), "{line}: {err}");
        }
    }

    #[test]
    fn parse_record_rejects_invalid_json() {
        let err = parse_record(r#"{"x":"#).expect_err("truncated JSON");
        assert!(matches!(err, LineError::Json(_)));
    }

    #[test]
    fn columns_follow_first_record() {
        let records = vec![
            parse_record(r#"{"b":1,"a":2}"#).expect("test"),
            parse_record(r#"{"c":3}"#).expect("test"),
        ];
        let columns = Columns::from_first(&records);
        assert_eq!(columns.as_slice(), ["b".to_string(), "a".to_string()]);
        assert_eq!(columns.len(), 2);
    }

    #[test]
    fn columns_of_nothing_are_empty() {
        assert!(Columns::from_first(&[]).is_empty());
    }

    #[test]
    fn columns_serialize_as_plain_array() {
        let columns = Columns::new(vec!["x".into(), "y".into()]);
        assert_eq!(serde_json::to_string(&columns).expect("test"), r#"["x","y"]"#);
    }
}

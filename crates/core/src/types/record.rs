//! Row payloads and identity handling.

use serde_json::{Map, Value};

/// A logical row: field name to JSON value.
pub type RecordData = Map<String, Value>;

/// Canonical text form of a row identity value.
///
/// Base datasets commonly carry numeric ids while the operation log stores
/// record ids as text; both sides compare through this form, so `7`
/// matches `"7"`.
pub fn canonical_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identity of a row, read from its `id` field.
pub fn row_id(row: &RecordData) -> Option<String> {
    row.get("id").and_then(canonical_id)
}

/// Loose equality used for overlay conditions.
pub fn values_match(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (canonical_id(a), canonical_id(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_text_ids_match() {
        assert!(values_match(&json!(7), &json!("7")));
        assert!(values_match(&json!("7"), &json!(7)));
        assert!(!values_match(&json!(7), &json!("8")));
    }

    #[test]
    fn row_id_reads_the_id_field() {
        let row: RecordData = serde_json::from_value(json!({"id": 42, "name": "x"})).unwrap();
        assert_eq!(row_id(&row), Some("42".to_string()));

        let row: RecordData = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(row_id(&row), None);
    }
}

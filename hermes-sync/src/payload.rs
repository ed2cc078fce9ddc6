//! Payload parsing: validate the document and pull out active alarm items.
//!
//! The document is a JSON object keyed by item name:
//!
//! ```json
//! { "SPX": { "value": "5321", "urgency": "Alarm", "color": "#ff0000" },
//!   "DAX": { "value": "18200", "urgency": "Normal", "color": "#80808080" } }
//! ```
//!
//! An item is an active alarm when it has `"alarm": true` or an `urgency` of
//! `alarm` / `critical` (any case). Order follows the document.

use hermes_core::{ActiveAlarms, SyncError};
use serde_json::{Map, Value};

const ALARM_URGENCIES: [&str; 2] = ["alarm", "critical"];

/// Parse `raw` and require a top-level object.
pub fn parse_document(raw: &str) -> Result<Map<String, Value>, SyncError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| SyncError::Parse(format!("invalid JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Parse(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

/// Names of items currently flagged as alarms, in document order.
pub fn active_alarms(document: &Map<String, Value>) -> ActiveAlarms {
    document
        .iter()
        .filter(|(_, item)| is_alarm(item))
        .map(|(name, _)| name.clone())
        .collect()
}

fn is_alarm(item: &Value) -> bool {
    let Some(fields) = item.as_object() else {
        return false;
    };
    if fields.get("alarm").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    fields
        .get("urgency")
        .and_then(Value::as_str)
        .map(|urgency| {
            ALARM_URGENCIES
                .iter()
                .any(|flag| urgency.trim().eq_ignore_ascii_case(flag))
        })
        .unwrap_or(false)
}

/// Unwrap a spreadsheet values response: the document is the string stored
/// in `values[0][0]`.
pub fn unwrap_sheets_cell(body: &str) -> Result<String, SyncError> {
    let response: Value = serde_json::from_str(body)
        .map_err(|e| SyncError::Parse(format!("invalid values response: {e}")))?;
    response
        .get("values")
        .and_then(|rows| rows.get(0))
        .and_then(|row| row.get(0))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| SyncError::Parse("values response has no cell at [0][0]".to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_and_flag_both_mark_alarms() {
        let doc = parse_document(
            r#"{
                "SPX": {"value": "1", "urgency": "Alarm"},
                "DAX": {"value": "2", "urgency": "Normal"},
                "NDX": {"value": "3", "alarm": true},
                "FTSE": {"value": "4", "urgency": " CRITICAL "}
            }"#,
        )
        .expect("parse");
        assert_eq!(active_alarms(&doc).as_slice(), ["SPX", "NDX", "FTSE"]);
    }

    #[test]
    fn non_object_items_are_ignored() {
        let doc = parse_document(r#"{"note": "hello", "SPX": {"alarm": false}}"#).expect("parse");
        assert!(active_alarms(&doc).is_empty());
    }

    #[test]
    fn top_level_array_is_a_parse_error() {
        let err = parse_document("[1, 2]").unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_document("<html>").unwrap_err(),
            SyncError::Parse(_)
        ));
    }

    #[test]
    fn sheets_cell_is_unwrapped() {
        let body = r#"{"range": "Sheet1!C3", "values": [["{\"SPX\": {\"urgency\": \"alarm\"}}"]]}"#;
        let inner = unwrap_sheets_cell(body).expect("unwrap");
        let doc = parse_document(&inner).expect("inner parse");
        assert_eq!(active_alarms(&doc).as_slice(), ["SPX"]);
    }

    #[test]
    fn empty_sheet_is_a_parse_error() {
        let err = unwrap_sheets_cell(r#"{"range": "Sheet1!C3"}"#).unwrap_err();
        assert!(err.to_string().contains("[0][0]"));
    }
}

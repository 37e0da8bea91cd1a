//! Lenient parsing of agent output into raw biomarker records
//!
//! Models are asked for a bare JSON object but often wrap it in prose or a
//! markdown fence, or leave trailing commas behind. Parsing recovers the
//! JSON payload, then sanitizes each entry:
//!
//! ```text
//! "Here you go: ```json {\"biomarkers\": [...],} ```"
//!   │ strip fence / prose
//!   ▼
//! {"biomarkers": [...],}
//!   │ drop trailing commas
//!   ▼
//! serde_json::Value ─► sanitize entries ─► Vec<RawBiomarkerRecord>
//! ```

use std::sync::LazyLock;

use consensus::{RawBiomarkerRecord, RawValue};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{AgentError, AgentResult};

/// Test name given to entries that arrive without one
pub const UNKNOWN_TEST_NAME: &str = "Unknown Test";

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").expect("FENCE_RE regex should compile")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("TRAILING_COMMA_RE regex should compile"));

/// Cut the JSON payload out of surrounding text.
///
/// Prefers the contents of a code fence, then the span from the first `{`
/// or `[` to the last matching closer.
pub fn extract_json_payload(text: &str) -> Option<&str> {
    let inner = FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str());

    let start = inner.find(['{', '['])?;
    let closer = if inner[start..].starts_with('{') { '}' } else { ']' };
    let end = inner.rfind(closer)?;
    (end > start).then(|| &inner[start..=end])
}

/// Parse one agent's raw output.
///
/// Accepts `{"biomarkers": [...]}` or a bare array. Returns
/// [`AgentError::Malformed`] when no JSON can be recovered and
/// [`AgentError::Empty`] when the list holds no usable entries.
pub fn parse_agent_output(agent_id: &str, text: &str) -> AgentResult<Vec<RawBiomarkerRecord>> {
    let entries = match parse_payload(text)? {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("biomarkers") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(AgentError::Malformed(format!(
                    "'biomarkers' is {} instead of an array",
                    json_kind(&other)
                )))
            }
            None => return Err(AgentError::Malformed("missing 'biomarkers' field".to_string())),
        },
        other => {
            return Err(AgentError::Malformed(format!(
                "top-level JSON is {}",
                json_kind(&other)
            )))
        }
    };

    let total = entries.len();
    let records: Vec<RawBiomarkerRecord> = entries
        .into_iter()
        .filter_map(|entry| sanitize_entry(agent_id, entry))
        .collect();

    debug!(
        agent = agent_id,
        entries = total,
        records = records.len(),
        skipped = total - records.len(),
        "Parsed agent output"
    );

    if records.is_empty() {
        return Err(AgentError::Empty);
    }
    Ok(records)
}

/// Recover and decode the JSON payload, repairing trailing commas.
fn parse_payload(text: &str) -> AgentResult<Value> {
    let payload = extract_json_payload(text)
        .ok_or_else(|| AgentError::Malformed("no JSON object in agent output".to_string()))?;

    match serde_json::from_str(payload) {
        Ok(v) => Ok(v),
        Err(_) => {
            let repaired = TRAILING_COMMA_RE.replace_all(payload, "$1");
            serde_json::from_str(&repaired).map_err(|e| AgentError::Malformed(e.to_string()))
        }
    }
}

/// String entries of a top-level `notes` array; empty when absent.
pub fn parse_notes(text: &str) -> Vec<String> {
    let Ok(Value::Object(map)) = parse_payload(text) else {
        return Vec::new();
    };
    match map.get("notes") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Turn one JSON entry into a record; non-objects are dropped.
fn sanitize_entry(agent_id: &str, entry: Value) -> Option<RawBiomarkerRecord> {
    let Value::Object(map) = entry else {
        return None;
    };

    let test_name = map
        .get("test_name")
        .and_then(scalar_text)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_TEST_NAME.to_string());

    let value = match map.get("value") {
        Some(Value::Number(n)) => n.as_f64().map(RawValue::Number),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Some(RawValue::Number(n)),
            _ => Some(RawValue::Text(s.clone())),
        },
        Some(Value::Bool(b)) => Some(RawValue::Text(b.to_string())),
        _ => None,
    };

    Some(RawBiomarkerRecord {
        agent_id: agent_id.to_string(),
        test_name,
        value,
        unit: map.get("unit").and_then(scalar_text),
        reference_range: map.get("reference_range").and_then(scalar_text),
    })
}

/// Strings as-is, numbers rendered; null and containers are absent.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
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
    fn test_plain_object() {
        let out = parse_agent_output(
            "a",
            r#"{"biomarkers": [{"test_name": "Hemoglobin", "value": 13.5, "unit": "g/dL", "reference_range": "13.0 - 17.0"}], "notes": []}"#,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].agent_id, "a");
        assert_eq!(out[0].value, Some(RawValue::Number(13.5)));
        assert_eq!(out[0].reference_range.as_deref(), Some("13.0 - 17.0"));
    }

    #[test]
    fn test_fenced_with_prose_and_trailing_commas() {
        let text = "Sure! Here are the results:\n```json\n{\"biomarkers\": [\n  {\"test_name\": \"Glucose\", \"value\": \"92\", \"unit\": \"mg/dL\",},\n],}\n```\nLet me know.";
        let out = parse_agent_output("b", text).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].test_name, "Glucose");
        assert_eq!(out[0].value, Some(RawValue::Number(92.0)));
    }

    #[test]
    fn test_bare_array() {
        let out =
            parse_agent_output("c", r#"[{"test_name": "HBsAg", "value": "Negative"}]"#).unwrap();
        assert_eq!(out[0].value, Some(RawValue::Text("Negative".into())));
    }

    #[test]
    fn test_sanitization() {
        let out = parse_agent_output(
            "a",
            r#"{"biomarkers": [
                "stray string",
                {"value": 4.1, "unit": null},
                {"test_name": "TSH", "value": null, "unit": "uIU/mL", "reference_range": 4.5}
            ]}"#,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].test_name, UNKNOWN_TEST_NAME);
        assert!(out[0].unit.is_none());
        assert!(out[1].value.is_none());
        assert_eq!(out[1].reference_range.as_deref(), Some("4.5"));
    }

    #[test]
    fn test_malformed_and_empty() {
        assert!(matches!(
            parse_agent_output("a", "I could not read the document."),
            Err(AgentError::Malformed(_))
        ));
        assert!(matches!(
            parse_agent_output("a", r#"{"results": []}"#),
            Err(AgentError::Malformed(_))
        ));
        assert!(matches!(
            parse_agent_output("a", r#"{"biomarkers": []}"#),
            Err(AgentError::Empty)
        ));
        assert!(matches!(
            parse_agent_output("a", r#"{"biomarkers": [1, 2]}"#),
            Err(AgentError::Empty)
        ));
    }

    #[test]
    fn test_notes() {
        let text = "```json\n{\"biomarkers\": [], \"notes\": [\"WBC resolved by majority\", 3,],}\n```";
        assert_eq!(parse_notes(text), vec!["WBC resolved by majority"]);
        assert!(parse_notes(r#"{"biomarkers": []}"#).is_empty());
        assert!(parse_notes("no json").is_empty());
    }

    #[test]
    fn test_extract_payload() {
        assert_eq!(extract_json_payload("x {\"a\": 1} y"), Some("{\"a\": 1}"));
        assert_eq!(extract_json_payload("no json"), None);
    }
}

//! Structured response parsing.
//!
//! Accepts either a native structured-output object (tool input) or a JSON
//! object embedded in free text, validates it, and produces a [`StepResponse`].
//! Providers that cannot express sum types flatten the action union with null
//! fields; nulls are stripped before validation, but a non-null mix of crop
//! and answer fields is rejected.

use serde_json::{Map, Value};

use crate::error::LmmError;
use crate::protocol::{Action, StepResponse};

const CROP_FIELDS: &[&str] = &["x", "y", "width", "height"];
const ANSWER_FIELDS: &[&str] = &["answer_text"];

/// Parse a step response from raw model text. The first balanced top-level
/// JSON object is decoded; trailing text is ignored.
pub fn parse_step_response_text(
    text: &str,
    provider: &'static str,
) -> Result<StepResponse, LmmError> {
    let object = extract_json_object(text).ok_or_else(|| parse_err(
        provider,
        "no JSON object found in output",
        text,
    ))?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| parse_err(provider, &format!("invalid JSON: {e}"), text))?;
    parse_step_response_value(&value, provider)
}

/// Parse a step response from an already-decoded JSON value.
pub fn parse_step_response_value(
    value: &Value,
    provider: &'static str,
) -> Result<StepResponse, LmmError> {
    let raw = value.to_string();
    let err = |message: String| parse_err(provider, &message, &raw);

    let obj = value
        .as_object()
        .ok_or_else(|| err("step response must be a JSON object".into()))?;

    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .ok_or_else(|| err("missing 'reasoning' field".into()))?;
    if reasoning.trim().is_empty() {
        return Err(err("'reasoning' must be non-empty".into()));
    }

    // Some providers hand the nested action back as a JSON-encoded string.
    let action_value = match obj.get("action") {
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .map_err(|e| err(format!("'action' was a string but not valid JSON: {e}")))?,
        Some(v) => v.clone(),
        None => return Err(err("missing 'action' field".into())),
    };
    let action_obj = action_value
        .as_object()
        .ok_or_else(|| err("'action' must be a JSON object".into()))?;

    // Flattened-union providers emit every field with nulls on the inactive
    // side; drop the nulls before validating exclusivity.
    let action: Map<String, Value> = action_obj
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let action_type = action
        .get("action_type")
        .and_then(Value::as_str)
        .ok_or_else(|| err("missing 'action_type' field".into()))?;

    let action = match action_type {
        "crop" => {
            reject_fields(&action, ANSWER_FIELDS, "crop", &err)?;
            reject_unknown(&action, CROP_FIELDS, &err)?;
            Action::Crop {
                x: coordinate(&action, "x", &err)?,
                y: coordinate(&action, "y", &err)?,
                width: dimension(&action, "width", &err)?,
                height: dimension(&action, "height", &err)?,
            }
        }
        "answer" => {
            reject_fields(&action, CROP_FIELDS, "answer", &err)?;
            reject_unknown(&action, ANSWER_FIELDS, &err)?;
            let text = action
                .get("answer_text")
                .and_then(Value::as_str)
                .ok_or_else(|| err("answer action requires 'answer_text'".into()))?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(err("'answer_text' must be non-empty".into()));
            }
            Action::Answer {
                answer_text: trimmed.to_string(),
            }
        }
        other => {
            return Err(err(format!(
                "unknown action_type '{other}', allowed: 'crop', 'answer'"
            )));
        }
    };

    Ok(StepResponse {
        reasoning: reasoning.to_string(),
        action,
    })
}

fn parse_err(provider: &'static str, message: &str, raw: &str) -> LmmError {
    LmmError::Parse {
        provider,
        message: message.to_string(),
        raw_output: raw.to_string(),
    }
}

fn reject_fields(
    action: &Map<String, Value>,
    forbidden: &[&str],
    kind: &str,
    err: &impl Fn(String) -> LmmError,
) -> Result<(), LmmError> {
    for field in forbidden {
        if action.contains_key(*field) {
            return Err(err(format!(
                "field '{field}' is not allowed on a {kind} action"
            )));
        }
    }
    Ok(())
}

fn reject_unknown(
    action: &Map<String, Value>,
    allowed: &[&str],
    err: &impl Fn(String) -> LmmError,
) -> Result<(), LmmError> {
    for key in action.keys() {
        if key != "action_type" && !allowed.contains(&key.as_str()) {
            return Err(err(format!("unexpected field '{key}' on action")));
        }
    }
    Ok(())
}

fn coordinate(
    action: &Map<String, Value>,
    field: &str,
    err: &impl Fn(String) -> LmmError,
) -> Result<u32, LmmError> {
    let value = action
        .get(field)
        .ok_or_else(|| err(format!("crop action requires '{field}'")))?;
    let n = value
        .as_u64()
        .ok_or_else(|| err(format!("'{field}' must be a non-negative integer")))?;
    u32::try_from(n).map_err(|_| err(format!("'{field}' out of range: {n}")))
}

fn dimension(
    action: &Map<String, Value>,
    field: &str,
    err: &impl Fn(String) -> LmmError,
) -> Result<u32, LmmError> {
    let n = coordinate(action, field, err)?;
    if n == 0 {
        return Err(err(format!("'{field}' must be at least 1")));
    }
    Ok(n)
}

/// Find the first balanced top-level JSON object in `text`, skipping braces
/// inside string literals.
fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

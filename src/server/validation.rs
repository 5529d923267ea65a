//! Shape checks for `POST /api/chat` bodies.
//!
//! The body is checked against a JSON Schema and every violation is reported,
//! so the 400 response can list all of them.

use std::sync::OnceLock;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{ValidationError, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chat::MessageView;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub code: &'static str,
    pub path: Vec<Value>,
    pub message: String,
}

impl Issue {
    fn new(code: &'static str, path: Vec<Value>, message: impl Into<String>) -> Self {
        Self {
            code,
            path,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChatRequest {
    messages: Vec<MessageView>,
}

fn request_schema() -> Value {
    json!({
        "type": "object",
        "required": ["messages"],
        "additionalProperties": false,
        "properties": {
            "messages": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "role", "content", "isUser", "timestamp"],
                    "additionalProperties": false,
                    "properties": {
                        "id": { "type": "string" },
                        "role": { "enum": ["system", "user", "assistant"] },
                        "content": { "type": "string" },
                        "isUser": { "type": "boolean" },
                        "timestamp": { "type": "string" }
                    }
                }
            }
        }
    })
}

fn validator() -> Result<&'static Validator, Issue> {
    static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();
    VALIDATOR
        .get_or_init(|| jsonschema::validator_for(&request_schema()).map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| Issue::new("custom", vec![], format!("Invalid request schema: {}", e)))
}

pub fn parse_chat_request(body: &[u8]) -> Result<Vec<MessageView>, Vec<Issue>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| vec![Issue::new("invalid_json", vec![], e.to_string())])?;

    let issues: Vec<Issue> = validator()
        .map_err(|e| vec![e])?
        .iter_errors(&value)
        .map(|e| to_issue(&e))
        .collect();
    if !issues.is_empty() {
        return Err(issues);
    }

    serde_json::from_value::<ChatRequest>(value)
        .map(|req| req.messages)
        .map_err(|e| vec![Issue::new("custom", vec![], e.to_string())])
}

fn to_issue(error: &ValidationError<'_>) -> Issue {
    let mut path = pointer_segments(&error.instance_path.to_string());

    match &error.kind {
        ValidationErrorKind::Required { property } => {
            path.push(property.clone());
            Issue::new("invalid_type", path, "Required")
        }
        ValidationErrorKind::Type { .. } => Issue::new(
            "invalid_type",
            path,
            format!("Expected {}, received {}", expected_type(error), type_name(&error.instance)),
        ),
        ValidationErrorKind::Enum { .. } => Issue::new(
            "invalid_enum_value",
            path,
            format!(
                "Invalid enum value. Expected 'system' | 'user' | 'assistant', received {}",
                error.instance
            ),
        ),
        ValidationErrorKind::AdditionalProperties { unexpected } => Issue::new(
            "unrecognized_keys",
            path,
            format!("Unrecognized key(s) in object: {}", unexpected.join(", ")),
        ),
        _ => Issue::new("custom", path, error.to_string()),
    }
}

/// Splits a JSON pointer into path segments; numeric segments are array indices.
fn pointer_segments(pointer: &str) -> Vec<Value> {
    pointer
        .split('/')
        .skip(1)
        .map(|segment| {
            let segment = segment.replace("~1", "/").replace("~0", "~");
            match segment.parse::<u64>() {
                Ok(index) => Value::from(index),
                Err(_) => Value::from(segment),
            }
        })
        .collect()
}

/// The `type` the failing schema node asked for.
fn expected_type(error: &ValidationError<'_>) -> String {
    let pointer = error.schema_path.to_string();
    request_schema()
        .pointer(&pointer)
        .and_then(Value::as_str)
        .unwrap_or("value")
        .to_string()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

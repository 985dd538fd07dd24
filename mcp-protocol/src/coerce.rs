//! Lenient parameter coercion, applied once at the RPC boundary.
//!
//! Tool arguments arrive as loosely typed JSON; everything past this
//! module works with strictly typed values. The policy: booleans accept
//! true/false, "true"/"false" in any case, 1/0, "1"/"0", "yes"/"no";
//! integers accept numbers or numeric strings; lists accept arrays,
//! comma-separated strings or JSON-encoded array strings; empty strings in
//! nullable fields mean null.

use lattice_core::{LatticeError, Result};
use serde_json::{Map, Value};

pub type Args = Map<String, Value>;

/// Optional string; empty or whitespace-only strings collapse to `None`.
pub fn opt_string(args: &Args, key: &str) -> Result<Option<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.clone()))
            }
        }
        Some(other) => Err(type_error(key, "a string", other)),
    }
}

/// Required string parameter.
pub fn require_string(args: &Args, key: &str) -> Result<String> {
    opt_string(args, key)?
        .ok_or_else(|| LatticeError::Validation(format!("Missing required parameter '{key}'")))
}

/// Optional boolean with the full coercion table.
pub fn opt_bool(args: &Args, key: &str) -> Result<Option<bool>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(type_error(key, "a boolean", &Value::Number(n.clone()))),
        },
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            "" => Ok(None),
            _ => Err(LatticeError::Validation(format!(
                "Parameter '{key}' is not a recognizable boolean: '{s}'"
            ))),
        },
        Some(other) => Err(type_error(key, "a boolean", other)),
    }
}

/// Boolean with a default.
pub fn bool_or(args: &Args, key: &str, default: bool) -> Result<bool> {
    Ok(opt_bool(args, key)?.unwrap_or(default))
}

/// Optional integer; numeric strings are accepted.
pub fn opt_i64(args: &Args, key: &str) -> Result<Option<i64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| type_error(key, "an integer", &Value::Number(n.clone()))),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed.parse::<i64>().map(Some).map_err(|_| {
                LatticeError::Validation(format!(
                    "Parameter '{key}' is not a recognizable integer: '{s}'"
                ))
            })
        }
        Some(other) => Err(type_error(key, "an integer", other)),
    }
}

/// Optional string list: array, comma-separated string, or JSON-encoded
/// array string.
pub fn opt_string_list(args: &Args, key: &str) -> Result<Option<Vec<String>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => values.push(s.clone()),
                    other => return Err(type_error(key, "a list of strings", other)),
                }
            }
            Ok(Some(values))
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            // JSON-encoded array string first, then comma-separated
            if trimmed.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) => values.push(s),
                            other => {
                                return Err(type_error(key, "a list of strings", &other))
                            }
                        }
                    }
                    return Ok(Some(values));
                }
            }
            Ok(Some(
                trimmed
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            ))
        }
        Some(other) => Err(type_error(key, "a list", other)),
    }
}

/// Optional JSON object: inline object or JSON-encoded object string.
pub fn opt_object(args: &Args, key: &str) -> Result<Option<Value>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(Value::Object(map.clone()))),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => Ok(Some(Value::Object(map))),
                _ => Err(LatticeError::Validation(format!(
                    "Parameter '{key}' is not a JSON object"
                ))),
            }
        }
        Some(other) => Err(type_error(key, "a JSON object", other)),
    }
}

fn type_error(key: &str, expected: &str, got: &Value) -> LatticeError {
    LatticeError::Validation(format!(
        "Parameter '{key}' must be {expected}, got {}",
        value_kind(got)
    ))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

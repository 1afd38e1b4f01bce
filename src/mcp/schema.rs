//! Validation of tool arguments against their JSON-schema-like `inputSchema`.
//!
//! Supports the subset tool manifests use: `type` (single or list),
//! `properties`, `required`, `additionalProperties: false`, `enum`, `items`,
//! `minimum`/`maximum`, `minLength`/`maxLength` and `pattern`.

use regex::Regex;
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Validate `value` against `schema`.
///
/// # Errors
///
/// Returns `AppError::InvalidParams` naming the first offending path.
pub fn validate(schema: &Value, value: &Value) -> Result<()> {
    check(schema, value, "$")
}

/// Structural sanity check run when a tool is registered.
///
/// # Errors
///
/// Returns `AppError::Config` if the schema is not an object or declares an
/// unknown type or an invalid pattern.
pub fn check_schema(schema: &Value) -> Result<()> {
    let Value::Object(obj) = schema else {
        return Err(AppError::Config("inputSchema must be an object".into()));
    };
    for ty in declared_types(obj) {
        if !KNOWN_TYPES.contains(&ty) {
            return Err(AppError::Config(format!("unknown schema type: {ty}")));
        }
    }
    if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
        Regex::new(pattern)
            .map_err(|err| AppError::Config(format!("invalid schema pattern {pattern:?}: {err}")))?;
    }
    if let Some(Value::Object(props)) = obj.get("properties") {
        for prop in props.values() {
            check_schema(prop)?;
        }
    }
    if let Some(items) = obj.get("items") {
        check_schema(items)?;
    }
    Ok(())
}

const KNOWN_TYPES: [&str; 7] = [
    "object", "array", "string", "number", "integer", "boolean", "null",
];

fn declared_types(schema: &Map<String, Value>) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(ty)) => vec![ty.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn type_matches(ty: &str, value: &Value) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn invalid(path: &str, message: impl std::fmt::Display) -> AppError {
    AppError::InvalidParams(format!("{path}: {message}"))
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<()> {
    let Value::Object(schema) = schema else {
        // `true`, `{}` or anything unrecognised accepts every value.
        return Ok(());
    };

    let types = declared_types(schema);
    if !types.is_empty() && !types.iter().any(|ty| type_matches(ty, value)) {
        return Err(invalid(path, format!("expected {}", types.join(" or "))));
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(invalid(path, format!("must be one of {}", Value::Array(allowed.clone()))));
        }
    }

    match value {
        Value::Object(fields) => check_object(schema, fields, path)?,
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{path}[{index}]"))?;
                }
            }
        }
        Value::String(s) => check_string(schema, s, path)?,
        Value::Number(n) => {
            if let Some(x) = n.as_f64() {
                if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                    if x < min {
                        return Err(invalid(path, format!("must be >= {min}")));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                    if x > max {
                        return Err(invalid(path, format!("must be <= {max}")));
                    }
                }
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
    Ok(())
}

fn check_object(schema: &Map<String, Value>, fields: &Map<String, Value>, path: &str) -> Result<()> {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                return Err(invalid(path, format!("missing required property {name:?}")));
            }
        }
    }
    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (name, field) in fields {
        match properties.and_then(|p| p.get(name)) {
            Some(prop_schema) => check(prop_schema, field, &format!("{path}.{name}"))?,
            None if closed => {
                return Err(invalid(path, format!("unexpected property {name:?}")));
            }
            None => {}
        }
    }
    Ok(())
}

fn check_string(schema: &Map<String, Value>, s: &str, path: &str) -> Result<()> {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            return Err(invalid(path, format!("must be at least {min} characters")));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            return Err(invalid(path, format!("must be at most {max} characters")));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        let re = Regex::new(pattern)
            .map_err(|err| invalid(path, format!("schema pattern is invalid: {err}")))?;
        if !re.is_match(s) {
            return Err(invalid(path, format!("does not match {pattern:?}")));
        }
    }
    Ok(())
}

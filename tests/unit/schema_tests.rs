//! Argument validation against tool input schemas.

use persona_mcp::mcp::schema::{check_schema, validate};
use persona_mcp::AppError;
use serde_json::{json, Value};

fn add_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": {"type": "number"},
            "b": {"type": "number"}
        },
        "required": ["a", "b"],
        "additionalProperties": false
    })
}

fn message(result: persona_mcp::Result<()>) -> String {
    match result {
        Err(AppError::InvalidParams(msg)) => msg,
        other => panic!("expected InvalidParams, got {other:?}"),
    }
}

#[test]
fn accepts_matching_arguments() {
    assert!(validate(&add_schema(), &json!({"a": 5, "b": 3.5})).is_ok());
}

#[test]
fn missing_required_property_is_named() {
    let msg = message(validate(&add_schema(), &json!({"a": 5})));
    assert!(msg.contains("\"b\""), "{msg}");
}

#[test]
fn wrong_type_is_reported_with_path() {
    let msg = message(validate(&add_schema(), &json!({"a": "five", "b": 3})));
    assert_eq!(msg, "$.a: expected number");
}

#[test]
fn closed_object_rejects_extra_properties() {
    let msg = message(validate(&add_schema(), &json!({"a": 1, "b": 2, "c": 3})));
    assert!(msg.contains("unexpected property"), "{msg}");
}

#[test]
fn open_object_allows_extra_properties() {
    let schema = json!({"type": "object", "properties": {"a": {"type": "number"}}});
    assert!(validate(&schema, &json!({"a": 1, "anything": [1, 2]})).is_ok());
}

#[test]
fn union_types_and_enums() {
    let schema = json!({"type": ["string", "null"], "enum": ["low", "high", null]});
    assert!(validate(&schema, &json!("low")).is_ok());
    assert!(validate(&schema, &Value::Null).is_ok());
    assert!(validate(&schema, &json!("medium")).is_err());
    assert!(validate(&schema, &json!(1)).is_err());
}

#[test]
fn numeric_bounds() {
    let schema = json!({"type": "integer", "minimum": 1, "maximum": 10});
    assert!(validate(&schema, &json!(1)).is_ok());
    assert!(validate(&schema, &json!(10)).is_ok());
    assert!(validate(&schema, &json!(0)).is_err());
    assert!(validate(&schema, &json!(11)).is_err());
}

#[test]
fn string_length_counts_characters_and_pattern_applies() {
    let schema = json!({"type": "string", "minLength": 2, "maxLength": 3, "pattern": "^[a-zé]+$"});
    assert!(validate(&schema, &json!("éé")).is_ok());
    assert!(validate(&schema, &json!("é")).is_err());
    assert!(validate(&schema, &json!("abcd")).is_err());
    assert!(validate(&schema, &json!("AB")).is_err());
}

#[test]
fn empty_schema_accepts_anything() {
    assert!(validate(&json!({}), &json!([1, "two", {"three": 3}])).is_ok());
    assert!(validate(&json!(true), &json!(null)).is_ok());
}

#[test]
fn registration_check_rejects_bad_schemas() {
    assert!(check_schema(&add_schema()).is_ok());
    assert!(matches!(check_schema(&json!("object")), Err(AppError::Config(_))));
    assert!(check_schema(&json!({"type": "object", "properties": {"x": {"type": "float"}}})).is_err());
    assert!(check_schema(&json!({"type": "array", "items": {"type": "string", "pattern": "("}})).is_err());
}

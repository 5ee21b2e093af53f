//! Minimal JSON Schema checks applied to tool input before execution.
//!
//! Only the subset tools actually declare is enforced: the input must be an
//! object, `required` properties must be present, and declared primitive
//! property types must match.

use serde_json::Value;

/// Check `input` against a tool's declared `schema`.
///
/// Returns a human-readable message describing the first violation.
pub fn validate_input(schema: &Value, input: &Value) -> std::result::Result<(), String> {
    let Some(obj) = input.as_object() else {
        return Err(format!("expected an object, got {}", type_name(input)));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(format!("missing required property '{}'", key));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(expected) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
        else {
            continue;
        };
        if !matches_type(expected, value) {
            return Err(format!(
                "property '{}' should be {}, got {}",
                key,
                expected,
                type_name(value)
            ));
        }
        if expected == "array" {
            if let Some(item_type) = properties[key]
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(|t| t.as_str())
            {
                let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                if let Some(bad) = items.iter().find(|v| !matches_type(item_type, v)) {
                    return Err(format!(
                        "items of '{}' should be {}, got {}",
                        key,
                        item_type,
                        type_name(bad)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keywords are not enforced
        _ => true,
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" }
            },
            "required": ["a", "b"]
        })
    }

    #[test]
    fn test_valid_input() {
        assert!(validate_input(&add_schema(), &json!({"a": 2, "b": 2.5})).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate_input(&add_schema(), &json!({"a": 2})).unwrap_err();
        assert!(err.contains("'b'"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_input(&add_schema(), &json!({"a": "2", "b": 2})).unwrap_err();
        assert!(err.contains("should be number"));
    }

    #[test]
    fn test_non_object_input() {
        assert!(validate_input(&add_schema(), &json!([1, 2])).is_err());
    }

    #[test]
    fn test_array_item_types() {
        let schema = json!({
            "type": "object",
            "properties": { "nums": { "type": "array", "items": { "type": "number" } } },
            "required": ["nums"]
        });
        assert!(validate_input(&schema, &json!({"nums": [1, 2, 3]})).is_ok());
        assert!(validate_input(&schema, &json!({"nums": [1, "x"]})).is_err());
    }

    #[test]
    fn test_empty_schema_accepts_any_object() {
        assert!(validate_input(&json!({"type": "object"}), &json!({"anything": true})).is_ok());
    }
}

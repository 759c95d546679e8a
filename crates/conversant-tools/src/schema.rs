//! Structural validation of tool arguments against the declared JSON schema.
//!
//! Covers what the built-in tool schemas actually use: object type, required
//! properties, property types, and string enums. Unknown keywords and extra
//! argument fields are tolerated.

use serde_json::Value;

/// First violation found, with a JSON-pointer-ish path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub detail: String,
}

impl SchemaViolation {
    fn at(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Validate `args` against `schema`. Returns the first violation.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), SchemaViolation> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(SchemaViolation::at("/", "expected an object"));
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if args.get(key).is_none() {
                return Err(SchemaViolation::at(
                    format!("/{key}"),
                    "missing required property",
                ));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in properties {
            let Some(value) = args.get(key) else { continue };
            check_property(key, prop_schema, value)?;
        }
    }

    Ok(())
}

fn check_property(key: &str, schema: &Value, value: &Value) -> Result<(), SchemaViolation> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(SchemaViolation::at(
                format!("/{key}"),
                format!("expected {expected}"),
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(SchemaViolation::at(
                format!("/{key}"),
                format!(
                    "must be one of {}",
                    allowed
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
    }

    Ok(())
}

//! Argument validation against a tool's declared `inputSchema`.
//!
//! Covers the JSON Schema subset tool providers actually emit: `type`,
//! `properties`, `required`, `additionalProperties: false`, `enum`, `items`,
//! `minimum`/`maximum`/`exclusiveMinimum`/`exclusiveMaximum` and
//! `minLength`/`maxLength`. Unknown keywords are ignored.

use std::fmt;

use serde_json::{Map, Value};

/// Where and why a value failed its schema
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON-pointer-like path to the offending value (`$` is the root)
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for SchemaViolation {}

/// Validate `value` against `schema`
pub fn validate(schema: &Value, value: &Value) -> Result<(), SchemaViolation> {
    check(schema, value, "$")
}

fn violation(path: &str, message: impl Into<String>) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    // `true`, `{}` and non-object schemas accept anything
    let Some(schema) = schema.as_object() else {
        return match schema {
            Value::Bool(false) => Err(violation(path, "no value is allowed here")),
            _ => Ok(()),
        };
    };

    if let Some(expected) = schema.get("type") {
        check_type(expected, value, path)?;
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(violation(path, format!("must be one of {}", Value::Array(allowed.clone()))));
        }
    }

    match value {
        Value::Object(fields) => check_object(schema, fields, path)?,
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
        }
        Value::Number(n) => {
            if let Some(x) = n.as_f64() {
                check_bounds(schema, x, path)?;
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if len < min {
                    return Err(violation(path, format!("must be at least {min} characters")));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if len > max {
                    return Err(violation(path, format!("must be at most {max} characters")));
                }
            }
        }
        Value::Null | Value::Bool(_) => {}
    }

    Ok(())
}

fn check_type(expected: &Value, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    let matches = match expected {
        Value::String(name) => type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| type_matches(name, value)),
        _ => true,
    };
    if matches {
        Ok(())
    } else {
        Err(violation(
            path,
            format!("expected {}, found {}", expected_label(expected), type_name(value)),
        ))
    }
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => true,
    }
}

fn expected_label(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_object(
    schema: &Map<String, Value>,
    fields: &Map<String, Value>,
    path: &str,
) -> Result<(), SchemaViolation> {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                return Err(violation(path, format!("missing required property '{name}'")));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));

    for (name, field) in fields {
        let field_path = format!("{path}.{name}");
        match properties.and_then(|p| p.get(name)) {
            Some(field_schema) => check(field_schema, field, &field_path)?,
            None if closed => return Err(violation(&field_path, "unexpected property")),
            None => {
                if let Some(extra) = schema.get("additionalProperties").filter(|v| v.is_object()) {
                    check(extra, field, &field_path)?;
                }
            }
        }
    }

    Ok(())
}

fn check_bounds(schema: &Map<String, Value>, x: f64, path: &str) -> Result<(), SchemaViolation> {
    let bound = |key: &str| schema.get(key).and_then(Value::as_f64);

    if let Some(min) = bound("minimum") {
        if x < min {
            return Err(violation(path, format!("must be >= {min}")));
        }
    }
    if let Some(max) = bound("maximum") {
        if x > max {
            return Err(violation(path, format!("must be <= {max}")));
        }
    }
    if let Some(min) = bound("exclusiveMinimum") {
        if x <= min {
            return Err(violation(path, format!("must be > {min}")));
        }
    }
    if let Some(max) = bound("exclusiveMaximum") {
        if x >= max {
            return Err(violation(path, format!("must be < {max}")));
        }
    }
    Ok(())
}

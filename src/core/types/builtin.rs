//! Built-in value types and the default casting table.

use chrono::{DateTime, Utc};

use super::{TypeDescriptor, TypeRegistry};
use crate::core::value::{Value, ValueKind};

pub const ANY: &str = "any";
pub const INT: &str = "int";
pub const FLOAT: &str = "float";
pub const BOOL: &str = "bool";
pub const STR: &str = "str";
pub const BYTES: &str = "bytes";
pub const JSON: &str = "json";
pub const LIST: &str = "list";
pub const DATETIME: &str = "datetime";

fn unexpected(expected: &str, found: &Value) -> String {
    format!("expected {expected}, got {}", found.kind())
}

fn descriptors() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::any(ANY).alias("object"),
        TypeDescriptor::new(INT)
            .accepts(ValueKind::Int)
            .alias("integer")
            .alias("i64"),
        TypeDescriptor::new(FLOAT)
            .accepts(ValueKind::Float)
            .alias("f64")
            .alias("number"),
        TypeDescriptor::new(BOOL)
            .accepts(ValueKind::Bool)
            .alias("boolean"),
        TypeDescriptor::new(STR)
            .accepts(ValueKind::Str)
            .alias("string"),
        TypeDescriptor::new(BYTES).accepts(ValueKind::Bytes),
        TypeDescriptor::new(JSON).accepts(ValueKind::Json),
        TypeDescriptor::new(LIST)
            .accepts(ValueKind::List)
            .alias("array"),
        TypeDescriptor::new(DATETIME).accepts(ValueKind::DateTime),
    ]
}

/// Registers every built-in type and converter on `registry`.
pub(crate) fn install(registry: &TypeRegistry) {
    for descriptor in descriptors() {
        registry.register_type(descriptor);
    }

    let casts: Vec<Result<(), crate::core::error::TypeError>> = vec![
        // numbers
        registry.register_cast_pair(
            INT,
            FLOAT,
            |v| match v {
                Value::Int(i) => Ok(Value::Float(i as f64)),
                other => Err(unexpected(INT, &other)),
            },
            |v| match v {
                Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
                Value::Float(f) => Err(format!("{f} has no integer representation")),
                other => Err(unexpected(FLOAT, &other)),
            },
        ),
        registry.register_cast_pair(
            INT,
            BOOL,
            |v| match v {
                Value::Int(i) => Ok(Value::Bool(i != 0)),
                other => Err(unexpected(INT, &other)),
            },
            |v| match v {
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                other => Err(unexpected(BOOL, &other)),
            },
        ),
        registry.register_cast_pair(
            FLOAT,
            BOOL,
            |v| match v {
                Value::Float(f) => Ok(Value::Bool(f != 0.0)),
                other => Err(unexpected(FLOAT, &other)),
            },
            |v| match v {
                Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
                other => Err(unexpected(BOOL, &other)),
            },
        ),
        // text
        registry.register_cast(INT, STR, |v| Ok(Value::Str(v.to_string()))),
        registry.register_cast(FLOAT, STR, |v| Ok(Value::Str(v.to_string()))),
        registry.register_cast(BOOL, STR, |v| Ok(Value::Str(v.to_string()))),
        registry.register_cast_pair(
            BYTES,
            STR,
            |v| match v {
                Value::Bytes(b) => Ok(Value::Str(String::from_utf8_lossy(&b).into_owned())),
                other => Err(unexpected(BYTES, &other)),
            },
            |v| match v {
                Value::Str(s) => Ok(Value::Bytes(s.into_bytes())),
                other => Err(unexpected(STR, &other)),
            },
        ),
        // json
        registry.register_cast_pair(
            JSON,
            INT,
            |v| match v {
                Value::Json(j) => j
                    .as_i64()
                    .map(Value::Int)
                    .ok_or_else(|| format!("{j} is not an integer")),
                other => Err(unexpected(JSON, &other)),
            },
            |v| Ok(Value::Json(v.to_json())),
        ),
        registry.register_cast_pair(
            JSON,
            FLOAT,
            |v| match v {
                Value::Json(j) => j
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| format!("{j} is not a number")),
                other => Err(unexpected(JSON, &other)),
            },
            |v| Ok(Value::Json(v.to_json())),
        ),
        registry.register_cast_pair(
            JSON,
            BOOL,
            |v| match v {
                Value::Json(j) => j
                    .as_bool()
                    .map(Value::Bool)
                    .ok_or_else(|| format!("{j} is not a boolean")),
                other => Err(unexpected(JSON, &other)),
            },
            |v| Ok(Value::Json(v.to_json())),
        ),
        registry.register_cast_pair(
            JSON,
            STR,
            |v| match v {
                Value::Json(serde_json::Value::String(s)) => Ok(Value::Str(s)),
                Value::Json(j) => Ok(Value::Str(j.to_string())),
                other => Err(unexpected(JSON, &other)),
            },
            |v| Ok(Value::Json(v.to_json())),
        ),
        // lists
        registry.register_cast(INT, LIST, |v| Ok(Value::List(vec![v]))),
        registry.register_cast(FLOAT, LIST, |v| Ok(Value::List(vec![v]))),
        registry.register_cast(BOOL, LIST, |v| Ok(Value::List(vec![v]))),
        registry.register_cast(STR, LIST, |v| match v {
            Value::Str(s) => Ok(Value::List(
                s.chars().map(|c| Value::Str(c.to_string())).collect(),
            )),
            other => Err(unexpected(STR, &other)),
        }),
        registry.register_cast(BYTES, LIST, |v| match v {
            Value::Bytes(b) => Ok(Value::List(
                b.into_iter().map(|x| Value::Int(i64::from(x))).collect(),
            )),
            other => Err(unexpected(BYTES, &other)),
        }),
        // time
        registry.register_cast_pair(
            DATETIME,
            STR,
            |v| match v {
                Value::DateTime(dt) => Ok(Value::Str(dt.to_rfc3339())),
                other => Err(unexpected(DATETIME, &other)),
            },
            |v| match v {
                Value::Str(s) => DateTime::parse_from_rfc3339(&s)
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                    .map_err(|e| format!("'{s}' is not an RFC 3339 timestamp: {e}")),
                other => Err(unexpected(STR, &other)),
            },
        ),
        registry.register_cast_pair(
            DATETIME,
            FLOAT,
            |v| match v {
                Value::DateTime(dt) => {
                    Ok(Value::Float(dt.timestamp_micros() as f64 / 1_000_000.0))
                }
                other => Err(unexpected(DATETIME, &other)),
            },
            |v| match v {
                Value::Float(f) if f.is_finite() => {
                    DateTime::from_timestamp_micros((f * 1_000_000.0).round() as i64)
                        .map(Value::DateTime)
                        .ok_or_else(|| format!("{f} is out of range for a timestamp"))
                }
                Value::Float(f) => Err(format!("{f} is not a timestamp")),
                other => Err(unexpected(FLOAT, &other)),
            },
        ),
    ];

    for result in casts {
        if let Err(e) = result {
            log::error!("Failed to install built-in cast: {}", e);
        }
    }
}

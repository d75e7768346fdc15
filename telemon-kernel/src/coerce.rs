//! Numeric coercion for heterogeneous snapshot values.
//!
//! Reporters send the same metric sometimes as a JSON number, sometimes as a
//! numeric string ("512", "3.14"). Everything funnels through [`to_f64`].

use crate::error::{KernelError, KernelResult};
use serde_json::Value;

/// Converts a decoded value into `f64`.
///
/// Accepts any JSON number (signed, unsigned or float) and strings holding a
/// decimal float. Booleans, nulls, arrays, objects and non-numeric strings
/// fail with [`KernelError::UnsupportedType`].
pub fn to_f64(value: &Value) -> KernelResult<f64> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(u as f64)
            } else if let Some(i) = n.as_i64() {
                Ok(i as f64)
            } else {
                n.as_f64().ok_or(KernelError::UnsupportedType("number"))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| KernelError::UnsupportedType("non-numeric string")),
        Value::Bool(_) => Err(KernelError::UnsupportedType("bool")),
        Value::Null => Err(KernelError::UnsupportedType("null")),
        Value::Array(_) => Err(KernelError::UnsupportedType("array")),
        Value::Object(_) => Err(KernelError::UnsupportedType("object")),
    }
}

/// Same as [`to_f64`] for an optional lookup result; absence is a missing field.
pub fn field_f64(value: Option<&Value>, field: &str) -> KernelResult<f64> {
    match value {
        Some(v) => to_f64(v),
        None => Err(KernelError::FieldMissing(field.to_string())),
    }
}

/// True for absent/null, zero-length map, sequence or string, and zero-valued scalars.
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Bool(b)) => !*b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
    }
}

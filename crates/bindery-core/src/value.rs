#![forbid(unsafe_code)]

//! Bound values and the normalized comparison used to skip redundant writes.
//!
//! Element attributes are strings, model fields are whatever the model holds.
//! A text control showing `"1"` and a model holding `1` are the same value for
//! binding purposes, so the engine compares with [`loose_eq`] instead of `==`.
//!
//! # Comparison Rules
//!
//! | Left | Right | Rule |
//! |------|-------|------|
//! | `null` | `null` | equal |
//! | `null` | anything else | not equal |
//! | same primitive type | same primitive type | strict equality |
//! | number / string / bool | number / string / bool | numeric coercion (`""` is `0`, `true` is `1`) |
//! | bool | `"true"` / `"false"` | textual match |
//! | array | array | element-wise [`loose_eq`] |
//! | array | primitive | array joined with `,` then compared |
//! | object | anything | structural equality with another object only |

pub use serde_json::Value;

/// Compare two values after normalizing type-coerced representations.
#[must_use]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_), Value::Number(_)) => numeric_eq(a, b),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| loose_eq(l, r))
        }
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        (Value::Array(_), _) => loose_eq(&Value::String(display_string(a)), b),
        (_, Value::Array(_)) => loose_eq(a, &Value::String(display_string(b))),
        (Value::Bool(flag), Value::String(text)) | (Value::String(text), Value::Bool(flag)) => {
            text.trim() == if *flag { "true" } else { "false" } || numeric_eq(a, b)
        }
        _ => numeric_eq(a, b),
    }
}

fn numeric_eq(a: &Value, b: &Value) -> bool {
    match (to_number(a), to_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Numeric interpretation of a primitive value, if it has one.
#[must_use]
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok().filter(|n| !n.is_nan())
            }
        }
        _ => None,
    }
}

/// Text form used when a value is written into an attribute or text node.
///
/// Integral floats print without a fractional part (`100.0` -> `"100"`),
/// `null` prints as the empty string, arrays join with `,`.
#[must_use]
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return n.to_string();
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                    format!("{}", f as i64)
                }
                Some(f) => f.to_string(),
                None => n.to_string(),
            }
        }
        Value::Array(items) => items
            .iter()
            .map(display_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Whether a value counts as "set" for boolean-like properties and attributes.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

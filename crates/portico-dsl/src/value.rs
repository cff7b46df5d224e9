//! Value helpers over the JSON data model.
//!
//! Member and index lookup are total: probing a missing key, an
//! out-of-range index, or a non-container yields `null` instead of an
//! error, which is what lets templates reference optional context safely.

use crate::Value;

/// Human-facing type name used in error messages.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truthiness: null and empty containers/strings are false, zero is false.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Total member/index lookup.
///
/// Objects are probed by the key's string form; arrays accept numeric keys
/// and digit strings. Everything else resolves to `null`.
#[must_use]
pub fn member(object: &Value, key: &Value) -> Value {
    match object {
        Value::Object(map) => {
            let key = match key {
                Value::String(s) => s.clone(),
                other => to_display_string(other),
            };
            map.get(&key).cloned().unwrap_or(Value::Null)
        }
        Value::Array(items) => {
            let index = match key {
                Value::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
                Value::String(s) if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() => {
                    s.parse::<usize>().ok()
                }
                _ => None,
            };
            index
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

/// `toString` semantics, shared by the built-in and by template rendering.
#[must_use]
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    n.as_f64().map_or_else(|| n.to_string(), |f| {
        // Integral floats print without a trailing ".0".
        if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
            format!("{}", f as i64)
        } else {
            f.to_string()
        }
    })
}

/// Build a JSON number from an arithmetic result, preferring integers.
#[must_use]
pub(crate) fn number_from_f64(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        Value::Number(serde_json::Number::from(f as i64))
    } else {
        serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

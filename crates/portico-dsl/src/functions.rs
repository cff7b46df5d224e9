//! Built-in functions.
//!
//! The language has no function literals, so the higher-order shapes
//! (`map`, `filter`, `find`) cannot receive a callable; they keep the
//! graceful-degradation contract instead: `map`/`filter` return the input
//! array unchanged and `find` yields `null`. Everything else follows the
//! loose coercion rules of the rest of the language — wrong-typed inputs
//! degrade to a neutral value rather than erroring.

use crate::value::{member, to_display_string};
use crate::{DslError, Value};

pub(crate) fn call(name: &str, args: &[Value]) -> Result<Value, DslError> {
    match name {
        "toString" => Ok(Value::String(to_display_string(arg(args, 0)))),
        "toNumber" => Ok(to_number(arg(args, 0))),
        "toJSON" => Ok(Value::String(
            serde_json::to_string(arg(args, 0))
                .unwrap_or_else(|e| format!("<JSON Error: {e}>")),
        )),
        "fromJSON" => Ok(match arg(args, 0) {
            Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        "length" => Ok(Value::Number(serde_json::Number::from(match arg(args, 0) {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            _ => 0,
        }))),
        "keys" => Ok(match arg(args, 0) {
            Value::Object(o) => Value::Array(o.keys().cloned().map(Value::String).collect()),
            _ => Value::Array(vec![]),
        }),
        "values" => Ok(match arg(args, 0) {
            Value::Object(o) => Value::Array(o.values().cloned().collect()),
            _ => Value::Array(vec![]),
        }),
        // No callable values exist; arrays pass through, anything else is [].
        "map" | "filter" => Ok(match arg(args, 0) {
            arr @ Value::Array(_) => arr.clone(),
            _ => Value::Array(vec![]),
        }),
        "find" => Ok(Value::Null),
        "sort" => Ok(sort(arg(args, 0))),
        "slice" => Ok(slice(arg(args, 0), arg(args, 1), args.get(2))),
        "concat" => Ok(concat(args)),
        "join" => Ok(join(arg(args, 0), arg(args, 1))),
        "split" => Ok(split(arg(args, 0), arg(args, 1))),
        "replace" => Ok(replace(arg(args, 0), arg(args, 1), arg(args, 2))),
        "match" => Ok(regex_match(arg(args, 0), arg(args, 1))),
        "extract" => Ok(extract(arg(args, 0), arg(args, 1))),
        "default" => Ok(default(arg(args, 0), arg(args, 1))),
        "merge" => Ok(merge(args)),
        "pick" => Ok(pick(arg(args, 0), &args[1.min(args.len())..])),
        "omit" => Ok(omit(arg(args, 0), &args[1.min(args.len())..])),
        other => Err(DslError::new(format!("unknown function: {other}"))),
    }
}

fn arg<'a>(args: &'a [Value], index: usize) -> &'a Value {
    args.get(index).unwrap_or(&Value::Null)
}

fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Value::Number(serde_json::Number::from(i))
            } else if let Ok(f) = trimmed.parse::<f64>() {
                crate::value::number_from_f64(f)
            } else {
                Value::Number(serde_json::Number::from(0))
            }
        }
        Value::Bool(b) => Value::Number(serde_json::Number::from(i64::from(*b))),
        _ => Value::Number(serde_json::Number::from(0)),
    }
}

fn sort(value: &Value) -> Value {
    let Value::Array(items) = value else {
        return Value::Array(vec![]);
    };

    let all_numbers = items.iter().all(Value::is_number);
    let all_strings = items.iter().all(Value::is_string);

    let mut sorted = items.clone();
    if all_numbers {
        sorted.sort_by(|a, b| {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        });
    } else if all_strings {
        sorted.sort_by(|a, b| a.as_str().unwrap_or("").cmp(b.as_str().unwrap_or("")));
    } else {
        // Heterogeneous arrays are returned unchanged.
        return value.clone();
    }
    Value::Array(sorted)
}

fn resolve_index(raw: i64, len: usize) -> usize {
    if raw < 0 {
        let from_end = len as i64 + raw;
        usize::try_from(from_end.max(0)).unwrap_or(0)
    } else {
        usize::try_from(raw).unwrap_or(usize::MAX).min(len)
    }
}

fn slice(value: &Value, start: &Value, end: Option<&Value>) -> Value {
    let start_raw = start.as_i64().unwrap_or(0);
    match value {
        Value::Array(items) => {
            let len = items.len();
            let s = resolve_index(start_raw, len);
            let e = end
                .and_then(Value::as_i64)
                .map_or(len, |raw| resolve_index(raw, len));
            Value::Array(items.get(s..e.max(s)).unwrap_or(&[]).to_vec())
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let len = chars.len();
            let s = resolve_index(start_raw, len);
            let e = end
                .and_then(Value::as_i64)
                .map_or(len, |raw| resolve_index(raw, len));
            Value::String(chars.get(s..e.max(s)).unwrap_or(&[]).iter().collect())
        }
        _ => Value::Array(vec![]),
    }
}

fn concat(args: &[Value]) -> Value {
    let mut out = Vec::new();
    for value in args {
        match value {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Value::Array(out)
}

fn join(value: &Value, separator: &Value) -> Value {
    let Value::Array(items) = value else {
        return Value::String(String::new());
    };
    let sep = match separator {
        Value::String(s) => s.as_str(),
        _ => ",",
    };
    let parts: Vec<String> = items.iter().map(to_display_string).collect();
    Value::String(parts.join(sep))
}

fn split(value: &Value, separator: &Value) -> Value {
    let Value::String(text) = value else {
        return Value::Array(vec![]);
    };
    let sep = match separator {
        Value::String(s) => s.as_str(),
        _ => ",",
    };
    Value::Array(
        text.split(sep)
            .map(|part| Value::String(part.to_string()))
            .collect(),
    )
}

fn replace(value: &Value, search: &Value, replacement: &Value) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    let search = search.as_str().unwrap_or("");
    let replacement = replacement.as_str().unwrap_or("");
    if search.is_empty() {
        return value.clone();
    }
    Value::String(text.replace(search, replacement))
}

fn regex_match(value: &Value, pattern: &Value) -> Value {
    let (Value::String(text), Value::String(pattern)) = (value, pattern) else {
        return Value::Bool(false);
    };
    match regex::Regex::new(pattern) {
        Ok(re) => Value::Bool(re.is_match(text)),
        Err(_) => Value::Bool(false),
    }
}

fn extract(value: &Value, pattern: &Value) -> Value {
    let (Value::String(text), Value::String(pattern)) = (value, pattern) else {
        return Value::Array(vec![]);
    };
    let Ok(re) = regex::Regex::new(pattern) else {
        return Value::Array(vec![]);
    };
    let matches = re
        .captures_iter(text)
        .map(|caps| {
            // With a capture group, extract the group; otherwise the whole match.
            let m = if caps.len() > 1 {
                caps.get(1).map_or("", |g| g.as_str())
            } else {
                caps.get(0).map_or("", |g| g.as_str())
            };
            Value::String(m.to_string())
        })
        .collect();
    Value::Array(matches)
}

fn default(value: &Value, fallback: &Value) -> Value {
    let empty = match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    };
    if empty { fallback.clone() } else { value.clone() }
}

fn merge(args: &[Value]) -> Value {
    let mut out = serde_json::Map::new();
    for value in args {
        if let Value::Object(map) = value {
            for (k, v) in map {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(out)
}

fn pick(value: &Value, keys: &[Value]) -> Value {
    let Value::Object(map) = value else {
        return Value::Object(serde_json::Map::new());
    };
    let mut out = serde_json::Map::new();
    for key in keys {
        if let Value::String(k) = key {
            let picked = member(value, key);
            if map.contains_key(k) {
                out.insert(k.clone(), picked);
            }
        }
    }
    Value::Object(out)
}

fn omit(value: &Value, keys: &[Value]) -> Value {
    let Value::Object(map) = value else {
        return Value::Object(serde_json::Map::new());
    };
    let mut out = map.clone();
    for key in keys {
        if let Value::String(k) = key {
            out.remove(k);
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::call;
    use serde_json::json;

    #[test]
    fn to_number_coerces_loosely() {
        assert_eq!(call("toNumber", &[json!("42")]).expect("call"), json!(42));
        assert_eq!(call("toNumber", &[json!("4.5")]).expect("call"), json!(4.5));
        assert_eq!(call("toNumber", &[json!("abc")]).expect("call"), json!(0));
        assert_eq!(call("toNumber", &[json!(true)]).expect("call"), json!(1));
    }

    #[test]
    fn json_round_trip() {
        assert_eq!(
            call("toJSON", &[json!({"a": 1})]).expect("call"),
            json!(r#"{"a":1}"#)
        );
        assert_eq!(
            call("fromJSON", &[json!(r#"{"a":1}"#)]).expect("call"),
            json!({"a": 1})
        );
        assert_eq!(call("fromJSON", &[json!("not json")]).expect("call"), json!(null));
    }

    #[test]
    fn slice_supports_negative_indices() {
        assert_eq!(
            call("slice", &[json!([1, 2, 3, 4]), json!(1), json!(-1)]).expect("call"),
            json!([2, 3])
        );
        assert_eq!(
            call("slice", &[json!("hello"), json!(0), json!(2)]).expect("call"),
            json!("he")
        );
    }

    #[test]
    fn extract_prefers_capture_groups() {
        assert_eq!(
            call("extract", &[json!("a=1 b=2"), json!(r"(\w)=\d")]).expect("call"),
            json!(["a", "b"])
        );
        assert_eq!(
            call("extract", &[json!("x y z"), json!(r"\w")]).expect("call"),
            json!(["x", "y", "z"])
        );
    }

    #[test]
    fn default_replaces_null_and_empty() {
        assert_eq!(call("default", &[json!(null), json!("d")]).expect("call"), json!("d"));
        assert_eq!(call("default", &[json!(""), json!("d")]).expect("call"), json!("d"));
        assert_eq!(call("default", &[json!("v"), json!("d")]).expect("call"), json!("v"));
        assert_eq!(call("default", &[json!(0), json!("d")]).expect("call"), json!(0));
    }

    #[test]
    fn pick_and_omit_shape_objects() {
        let obj = json!({"a": 1, "b": 2, "c": 3});
        assert_eq!(
            call("pick", &[obj.clone(), json!("a"), json!("c")]).expect("call"),
            json!({"a": 1, "c": 3})
        );
        assert_eq!(
            call("omit", &[obj, json!("b")]).expect("call"),
            json!({"a": 1, "c": 3})
        );
    }

    #[test]
    fn higher_order_shapes_degrade_gracefully() {
        assert_eq!(
            call("map", &[json!([1, 2]), json!("x")]).expect("call"),
            json!([1, 2])
        );
        assert_eq!(call("map", &[json!("nope")]).expect("call"), json!([]));
        assert_eq!(call("find", &[json!([1, 2])]).expect("call"), json!(null));
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert!(call("launchMissiles", &[]).is_err());
    }
}

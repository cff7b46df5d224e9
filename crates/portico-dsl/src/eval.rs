//! Pure evaluator.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::value::{member, number_from_f64, to_display_string, truthy, type_name};
use crate::{DslError, Value, functions};

/// Evaluate an expression against a JSON context.
///
/// Identifiers resolve against the top level of `context` and, like member
/// lookups, yield `null` when absent.
///
/// # Errors
///
/// Returns a [`DslError`] for type errors, division by zero and unknown
/// functions.
pub fn evaluate(expr: &Expr, context: &Value) -> Result<Value, DslError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => Ok(member(context, &Value::String(name.clone()))),
        Expr::Member { object, property } => {
            let object = evaluate(object, context)?;
            Ok(member(&object, &Value::String(property.clone())))
        }
        Expr::Index { object, index } => {
            let object = evaluate(object, context)?;
            let index = evaluate(index, context)?;
            Ok(member(&object, &index))
        }
        Expr::Call { function, args } => {
            let mut evaluated = Vec::with_capacity(args.len());
            for a in args {
                evaluated.push(evaluate(a, context)?);
            }
            functions::call(function, &evaluated)
        }
        Expr::Unary { op, operand } => {
            let operand = evaluate(operand, context)?;
            apply_unary(*op, &operand)
        }
        Expr::Binary { op, left, right } => {
            // Short-circuit logical operators before evaluating the right side.
            match op {
                BinaryOp::And => {
                    let left = evaluate(left, context)?;
                    if !truthy(&left) {
                        return Ok(Value::Bool(false));
                    }
                    let right = evaluate(right, context)?;
                    return Ok(Value::Bool(truthy(&right)));
                }
                BinaryOp::Or => {
                    let left = evaluate(left, context)?;
                    if truthy(&left) {
                        return Ok(Value::Bool(true));
                    }
                    let right = evaluate(right, context)?;
                    return Ok(Value::Bool(truthy(&right)));
                }
                _ => {}
            }
            let left = evaluate(left, context)?;
            let right = evaluate(right, context)?;
            apply_binary(*op, &left, &right)
        }
        Expr::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            let condition = evaluate(condition, context)?;
            if truthy(&condition) {
                evaluate(then_expr, context)
            } else {
                evaluate(else_expr, context)
            }
        }
        Expr::Array(elements) => {
            let mut out = Vec::with_capacity(elements.len());
            for e in elements {
                out.push(evaluate(e, context)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Object(properties) => {
            let mut out = serde_json::Map::new();
            for (key, value_expr) in properties {
                out.insert(key.clone(), evaluate(value_expr, context)?);
            }
            Ok(Value::Object(out))
        }
    }
}

fn apply_unary(op: UnaryOp, operand: &Value) -> Result<Value, DslError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(operand))),
        UnaryOp::Neg => match operand.as_f64() {
            Some(f) => Ok(number_from_f64(-f)),
            None => Err(DslError::new(format!(
                "cannot negate {}",
                type_name(operand)
            ))),
        },
    }
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, DslError> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => numeric(op, left, right, |a, b| a - b),
        BinaryOp::Mul => multiply(left, right),
        BinaryOp::Div => {
            let (a, b) = numeric_operands(op, left, right)?;
            if b == 0.0 {
                return Err(DslError::new("division by zero"));
            }
            Ok(number_from_f64(a / b))
        }
        BinaryOp::Mod => {
            let (a, b) = numeric_operands(op, left, right)?;
            if b == 0.0 {
                return Err(DslError::new("modulo by zero"));
            }
            Ok(number_from_f64(a.rem_euclid(b)))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt => Ok(Value::Bool(compare(left, right).is_some_and(std::cmp::Ordering::is_lt))),
        BinaryOp::Le => Ok(Value::Bool(compare(left, right).is_some_and(std::cmp::Ordering::is_le))),
        BinaryOp::Gt => Ok(Value::Bool(compare(left, right).is_some_and(std::cmp::Ordering::is_gt))),
        BinaryOp::Ge => Ok(Value::Bool(compare(left, right).is_some_and(std::cmp::Ordering::is_ge))),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled by the short-circuit path"),
    }
}

fn add(left: &Value, right: &Value) -> Result<Value, DslError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (a, b) = (left.as_f64().unwrap_or(0.0), right.as_f64().unwrap_or(0.0));
            Ok(number_from_f64(a + b))
        }
        // String on either side concatenates.
        (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
            "{}{}",
            to_display_string(left),
            to_display_string(right)
        ))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        _ => Err(DslError::new(format!(
            "cannot add {} and {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn multiply(left: &Value, right: &Value) -> Result<Value, DslError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (a, b) = (left.as_f64().unwrap_or(0.0), right.as_f64().unwrap_or(0.0));
            Ok(number_from_f64(a * b))
        }
        (Value::String(s), Value::Number(n)) => {
            let count = n.as_i64().filter(|c| *c >= 0).ok_or_else(|| {
                DslError::new("string repetition requires a non-negative integer")
            })?;
            Ok(Value::String(s.repeat(usize::try_from(count).unwrap_or(0))))
        }
        (Value::Array(items), Value::Number(n)) => {
            let count = n.as_i64().filter(|c| *c >= 0).ok_or_else(|| {
                DslError::new("array repetition requires a non-negative integer")
            })?;
            let mut out = Vec::new();
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::Array(out))
        }
        _ => Err(DslError::new(format!(
            "cannot multiply {} and {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn numeric(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    apply: impl Fn(f64, f64) -> f64,
) -> Result<Value, DslError> {
    let (a, b) = numeric_operands(op, left, right)?;
    Ok(number_from_f64(apply(a, b)))
}

fn numeric_operands(op: BinaryOp, left: &Value, right: &Value) -> Result<(f64, f64), DslError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => Ok((a, b)),
        _ => Err(DslError::new(format!(
            "operator '{}' requires numbers, got {} and {}",
            op.as_str(),
            type_name(left),
            type_name(right)
        ))),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64())
        && left.is_number()
        && right.is_number()
    {
        return a == b;
    }
    left == right
}

/// Comparisons only order numbers with numbers and strings with strings;
/// anything else is unordered (all comparisons false).
fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => left
            .as_f64()
            .zip(right.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::eval_str;
    use serde_json::json;

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval_str("1 + 2 * 3", &json!({})).expect("eval"), json!(7));
        assert_eq!(eval_str("(1 + 2) * 3", &json!({})).expect("eval"), json!(9));
        assert_eq!(eval_str("7 % 3", &json!({})).expect("eval"), json!(1));
        assert_eq!(eval_str("10 / 4", &json!({})).expect("eval"), json!(2.5));
    }

    #[test]
    fn string_concatenation_coerces() {
        assert_eq!(
            eval_str(r#""n=" + 3"#, &json!({})).expect("eval"),
            json!("n=3")
        );
    }

    #[test]
    fn logical_operators_short_circuit_over_nulls() {
        let ctx = json!({"a": null});
        assert_eq!(eval_str("a && a.b.c", &ctx).expect("eval"), json!(false));
        assert_eq!(eval_str("!a || false", &ctx).expect("eval"), json!(true));
    }

    #[test]
    fn ternary_selects_by_truthiness() {
        let ctx = json!({"items": []});
        assert_eq!(
            eval_str(r#"items ? "some" : "none""#, &ctx).expect("eval"),
            json!("none")
        );
    }

    #[test]
    fn object_and_array_literals_evaluate_members() {
        let ctx = json!({"id": 7});
        assert_eq!(
            eval_str("{userId: id, tags: [id, id + 1]}", &ctx).expect("eval"),
            json!({"userId": 7, "tags": [7, 8]})
        );
    }

    #[test]
    fn comparisons_between_mixed_types_are_false() {
        assert_eq!(eval_str(r#"1 < "2""#, &json!({})).expect("eval"), json!(false));
        assert_eq!(eval_str(r#""a" < "b""#, &json!({})).expect("eval"), json!(true));
    }

    #[test]
    fn subtracting_non_numbers_errors() {
        assert!(eval_str(r#""a" - 1"#, &json!({})).is_err());
    }

    #[test]
    fn same_context_same_result() {
        let ctx = json!({"args": {"q": "rust"}, "config": {"baseUrl": "https://api"}});
        let src = r#"config.baseUrl + "/search?q=" + args.q"#;
        let first = eval_str(src, &ctx).expect("eval");
        let second = eval_str(src, &ctx).expect("eval");
        assert_eq!(first, second);
        assert_eq!(first, json!("https://api/search?q=rust"));
    }
}

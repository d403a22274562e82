//! Literal conversion and binary/unary operator semantics (§4.3).
//!
//! Kept free of any [`crate::env::EnvRef`]/evaluator state: every function
//! here is a pure `Value -> Value` (or `(Value, Value) -> Value`) mapping,
//! so [`crate::eval::Evaluator::eval_expr`] only has to thread control flow.

use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::error::EvalError;
use crate::value::Value;

pub fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Applies a non-short-circuiting binary operator. `&&`/`||` are handled by
/// the caller before operands are both evaluated (§4.3 "short-circuit
/// operators return the operand value, not a coerced boolean").
pub fn apply_binary(op: BinaryOp, left: Value, right: Value, location: &str) -> Result<Value, EvalError> {
    use BinaryOp::*;
    match op {
        Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", left.to_display_string(), right.to_display_string())))
            }
            _ => Err(type_error("+", &left, &right, location)),
        },
        Sub => numeric(left, right, location, "-", |a, b| Ok(a - b)),
        Mul => numeric(left, right, location, "*", |a, b| Ok(a * b)),
        Div => numeric(left, right, location, "/", |a, b| {
            if b == 0.0 {
                Err(EvalError::runtime(format!("division by zero at {}", location)))
            } else {
                Ok(a / b)
            }
        }),
        Mod => numeric(left, right, location, "%", |a, b| {
            if b == 0.0 {
                Err(EvalError::runtime(format!("modulo by zero at {}", location)))
            } else {
                Ok(a % b)
            }
        }),
        Lt => compare(left, right, location, |o| o.is_lt()),
        Le => compare(left, right, location, |o| o.is_le()),
        Gt => compare(left, right, location, |o| o.is_gt()),
        Ge => compare(left, right, location, |o| o.is_ge()),
        Eq => Ok(Value::Bool(left.equals(&right))),
        Ne => Ok(Value::Bool(!left.equals(&right))),
        // Short-circuit forms never reach here; kept exhaustive for clarity.
        And | Or => unreachable!("short-circuit operators are handled before both operands are evaluated"),
    }
}

pub fn apply_unary(op: UnaryOp, operand: Value, location: &str) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(EvalError::runtime(format!(
                "cannot negate a {} at {}",
                other.type_name(),
                location
            ))),
        },
        UnaryOp::Plus => match operand {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| EvalError::runtime(format!("cannot convert '{}' to a number at {}", s, location))),
            other => Err(EvalError::runtime(format!(
                "cannot convert a {} to a number at {}",
                other.type_name(),
                location
            ))),
        },
    }
}

fn numeric(left: Value, right: Value, location: &str, op: &str, f: impl Fn(f64, f64) -> Result<f64, EvalError>) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => f(*a, *b).map(Value::Number),
        _ => Err(type_error(op, &left, &right, location)),
    }
}

/// Numbers compare numerically; strings compare lexicographically by
/// codepoint (§4.3). Any other pairing is a type error.
fn compare(left: Value, right: Value, location: &str, accept: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => a
            .partial_cmp(b)
            .map(|o| Value::Bool(accept(o)))
            .ok_or_else(|| EvalError::runtime(format!("cannot compare NaN at {}", location))),
        (Value::String(a), Value::String(b)) => Ok(Value::Bool(accept(a.cmp(b)))),
        _ => Err(EvalError::runtime(format!(
            "cannot compare a {} and a {} at {}",
            left.type_name(),
            right.type_name(),
            location
        ))),
    }
}

fn type_error(op: &str, left: &Value, right: &Value, location: &str) -> EvalError {
    EvalError::runtime(format!(
        "cannot apply '{}' to a {} and a {} at {}",
        op,
        left.type_name(),
        right.type_name(),
        location
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_concatenation_triggers_when_either_side_is_a_string() {
        let result = apply_binary(BinaryOp::Add, Value::String("n=".into()), Value::Number(3.0), "t:1").unwrap();
        assert_eq!(result, Value::String("n=3".into()));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let err = apply_binary(BinaryOp::Div, Value::Number(1.0), Value::Number(0.0), "t:1").unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn strings_compare_lexicographically() {
        let result = apply_binary(BinaryOp::Lt, Value::String("a".into()), Value::String("b".into()), "t:1").unwrap();
        assert_eq!(result, Value::Bool(true));
    }
}

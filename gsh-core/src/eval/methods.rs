//! Member access and built-in method tables (§4.1, §4.9): everything that
//! can appear after a `.` other than a plain object field.
//!
//! Plain property reads (`arr.length`, `session.sessionId`, ...) are pure
//! and live in [`member_value`]. Higher-order array methods (`map`,
//! `filter`, `forEach`, `reduce`) need to call back into the evaluator to
//! invoke a script callback, so those are methods on
//! [`crate::eval::Evaluator`] itself rather than entries in this table;
//! [`crate::eval::Evaluator::eval_call`] special-cases them before falling
//! back to a plain member-value lookup.

use crate::acp::AcpSessionHandle;
use crate::error::EvalError;
use crate::value::{ArrayRef, MapData, ObjectMap, Property, SetData, Value};
use std::sync::{Arc, RwLock};

/// A pure property read: no evaluator, no script callback. Method calls that
/// need one are intercepted earlier in `eval_call`.
pub fn member_value(receiver: &Value, property: &str, location: &str) -> Result<Value, EvalError> {
    match receiver {
        Value::Object(map) => {
            let map = map.read().unwrap();
            map.get(property)
                .map(|p| p.value.clone())
                .ok_or_else(|| EvalError::runtime(format!("no such property '{}' at {}", property, location)))
        }
        Value::Array(items) => match property {
            "length" => Ok(Value::Number(items.read().unwrap().len() as f64)),
            other => Err(EvalError::runtime(format!("no such array property '{}' at {}", other, location))),
        },
        Value::String(s) => match property {
            "length" => Ok(Value::Number(s.chars().count() as f64)),
            other => Err(EvalError::runtime(format!("no such string property '{}' at {}", other, location))),
        },
        Value::Map(m) => match property {
            "size" => Ok(Value::Number(m.read().unwrap().size() as f64)),
            other => Err(EvalError::runtime(format!("no such map property '{}' at {}", other, location))),
        },
        Value::Set(s) => match property {
            "size" => Ok(Value::Number(s.read().unwrap().size() as f64)),
            other => Err(EvalError::runtime(format!("no such set property '{}' at {}", other, location))),
        },
        Value::Conversation(messages) => match property {
            "length" => Ok(Value::Number(messages.read().unwrap().len() as f64)),
            other => Err(EvalError::runtime(format!("no such conversation property '{}' at {}", other, location))),
        },
        Value::AcpSession(session) => acp_session_property(session, property),
        Value::EnvProxy => Ok(std::env::var(property).map(Value::String).unwrap_or(Value::Null)),
        other => Err(EvalError::runtime(format!(
            "a {} has no property '{}' at {}",
            other.type_name(),
            property,
            location
        ))),
    }
}

/// Per §4.9, a missing/unrecognized acp-session property reads as `null`
/// rather than erroring — only `object` property reads are strict.
fn acp_session_property(session: &Arc<AcpSessionHandle>, property: &str) -> Result<Value, EvalError> {
    Ok(match property {
        "sessionId" => Value::String(session.session_id().to_string()),
        "agent" => Value::String(session.agent_name().to_string()),
        "closed" => Value::Bool(session.is_closed()),
        "messages" => {
            let items = session_messages(session);
            Value::array(items)
        }
        "lastMessage" => session_messages(session).last().cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn session_messages(session: &Arc<AcpSessionHandle>) -> Vec<Value> {
    session
        .messages()
        .into_iter()
        .map(|m| {
            let mut map = ObjectMap::new();
            map.insert("role".into(), Property::new(Value::String(m.role.as_str().to_string())));
            map.insert("content".into(), Property::new(Value::String(m.content)));
            Value::object(map)
        })
        .collect()
}

pub fn array_method(arr: &ArrayRef, method: &str, args: Vec<Value>, location: &str) -> Result<Value, EvalError> {
    match method {
        "push" => {
            let mut items = arr.write().unwrap();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }
        "pop" => Ok(arr.write().unwrap().pop().unwrap_or(Value::Null)),
        "shift" => {
            let mut items = arr.write().unwrap();
            if items.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(items.remove(0))
            }
        }
        "unshift" => {
            let mut items = arr.write().unwrap();
            for (i, v) in args.into_iter().enumerate() {
                items.insert(i, v);
            }
            Ok(Value::Number(items.len() as f64))
        }
        "includes" => {
            let needle = args.first().ok_or_else(|| arity_error("includes", 1, location))?;
            Ok(Value::Bool(arr.read().unwrap().iter().any(|v| v.equals(needle))))
        }
        "indexOf" => {
            let needle = args.first().ok_or_else(|| arity_error("indexOf", 1, location))?;
            let pos = arr.read().unwrap().iter().position(|v| v.equals(needle));
            Ok(Value::Number(pos.map(|i| i as f64).unwrap_or(-1.0)))
        }
        "join" => {
            let sep = match args.first() {
                Some(Value::String(s)) => s.clone(),
                None => ",".to_string(),
                Some(_) => return Err(EvalError::runtime(format!("join separator must be a string at {}", location))),
            };
            let rendered: Vec<String> = arr.read().unwrap().iter().map(Value::to_display_string).collect();
            Ok(Value::String(rendered.join(&sep)))
        }
        "slice" => {
            let items = arr.read().unwrap();
            let (start, end) = slice_bounds(items.len(), &args);
            Ok(Value::array(items[start..end].to_vec()))
        }
        "reverse" => {
            let mut items = arr.write().unwrap();
            items.reverse();
            Ok(Value::Array(arr.clone()))
        }
        other => Err(EvalError::runtime(format!("no such array method '{}' at {}", other, location))),
    }
}

pub fn string_method(s: &str, method: &str, args: Vec<Value>, location: &str) -> Result<Value, EvalError> {
    match method {
        "toUpperCase" => Ok(Value::String(s.to_uppercase())),
        "toLowerCase" => Ok(Value::String(s.to_lowercase())),
        "trim" => Ok(Value::String(s.trim().to_string())),
        "includes" => {
            let needle = string_arg(&args, 0, "includes", location)?;
            Ok(Value::Bool(s.contains(&needle)))
        }
        "startsWith" => {
            let needle = string_arg(&args, 0, "startsWith", location)?;
            Ok(Value::Bool(s.starts_with(&needle)))
        }
        "endsWith" => {
            let needle = string_arg(&args, 0, "endsWith", location)?;
            Ok(Value::Bool(s.ends_with(&needle)))
        }
        "indexOf" => {
            let needle = string_arg(&args, 0, "indexOf", location)?;
            let chars: Vec<char> = s.chars().collect();
            let needle_chars: Vec<char> = needle.chars().collect();
            let pos = chars
                .windows(needle_chars.len().max(1))
                .position(|w| w == needle_chars.as_slice());
            Ok(Value::Number(pos.map(|i| i as f64).unwrap_or(-1.0)))
        }
        "split" => {
            let sep = string_arg(&args, 0, "split", location)?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(&sep as &str).map(|p| Value::String(p.to_string())).collect()
            };
            Ok(Value::array(parts))
        }
        "replace" => {
            let from = string_arg(&args, 0, "replace", location)?;
            let to = string_arg(&args, 1, "replace", location)?;
            Ok(Value::String(s.replacen(&from, &to, 1)))
        }
        "replaceAll" => {
            let from = string_arg(&args, 0, "replaceAll", location)?;
            let to = string_arg(&args, 1, "replaceAll", location)?;
            Ok(Value::String(s.replace(&from, &to)))
        }
        "charAt" => {
            let index = number_arg(&args, 0, "charAt", location)? as usize;
            Ok(s.chars().nth(index).map(|c| Value::String(c.to_string())).unwrap_or(Value::String(String::new())))
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), &args);
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        "repeat" => {
            let count = number_arg(&args, 0, "repeat", location)? as usize;
            Ok(Value::String(s.repeat(count)))
        }
        other => Err(EvalError::runtime(format!("no such string method '{}' at {}", other, location))),
    }
}

pub fn map_method(data: &Arc<RwLock<MapData>>, method: &str, args: Vec<Value>, location: &str) -> Result<Value, EvalError> {
    match method {
        "get" => {
            let key = args.first().ok_or_else(|| arity_error("get", 1, location))?;
            Ok(data.read().unwrap().get(key).unwrap_or(Value::Null))
        }
        "set" => {
            let key = args.first().cloned().ok_or_else(|| arity_error("set", 2, location))?;
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            data.write().unwrap().set(key, value);
            Ok(Value::Map(data.clone()))
        }
        "has" => {
            let key = args.first().ok_or_else(|| arity_error("has", 1, location))?;
            Ok(Value::Bool(data.read().unwrap().has(key)))
        }
        "delete" => {
            let key = args.first().ok_or_else(|| arity_error("delete", 1, location))?;
            Ok(Value::Bool(data.write().unwrap().delete(key)))
        }
        "clear" => {
            *data.write().unwrap() = MapData::new();
            Ok(Value::Null)
        }
        other => Err(EvalError::runtime(format!("no such map method '{}' at {}", other, location))),
    }
}

pub fn set_method(data: &Arc<RwLock<SetData>>, method: &str, args: Vec<Value>, location: &str) -> Result<Value, EvalError> {
    match method {
        "add" => {
            let value = args.into_iter().next().ok_or_else(|| arity_error("add", 1, location))?;
            data.write().unwrap().add(value);
            Ok(Value::Set(data.clone()))
        }
        "has" => {
            let value = args.first().ok_or_else(|| arity_error("has", 1, location))?;
            Ok(Value::Bool(data.read().unwrap().has(value)))
        }
        "delete" => {
            let value = args.first().ok_or_else(|| arity_error("delete", 1, location))?;
            Ok(Value::Bool(data.write().unwrap().delete(value)))
        }
        "clear" => {
            *data.write().unwrap() = SetData::new();
            Ok(Value::Null)
        }
        other => Err(EvalError::runtime(format!("no such set method '{}' at {}", other, location))),
    }
}

/// Sets `property` on an object, respecting the read-only flag (§4.1).
pub fn set_object_property(map: &crate::value::ObjectRef, property: &str, value: Value, location: &str) -> Result<(), EvalError> {
    let mut map = map.write().unwrap();
    if let Some(existing) = map.get(property) {
        if existing.read_only {
            return Err(EvalError::runtime(format!("'{}' is read-only at {}", property, location)));
        }
    }
    map.insert(property.to_string(), Property::new(value));
    Ok(())
}

fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
    let to_index = |v: Option<&Value>, default: i64| -> i64 {
        match v {
            Some(Value::Number(n)) => *n as i64,
            _ => default,
        }
    };
    let len_i = len as i64;
    let mut start = to_index(args.first(), 0);
    let mut end = to_index(args.get(1), len_i);
    if start < 0 {
        start += len_i;
    }
    if end < 0 {
        end += len_i;
    }
    let start = start.clamp(0, len_i) as usize;
    let end = end.clamp(0, len_i) as usize;
    if start >= end {
        (start, start)
    } else {
        (start, end)
    }
}

fn string_arg(args: &[Value], index: usize, method: &str, location: &str) -> Result<String, EvalError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(EvalError::runtime(format!("'{}' expects a string argument at {}", method, location))),
    }
}

fn number_arg(args: &[Value], index: usize, method: &str, location: &str) -> Result<f64, EvalError> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        _ => Err(EvalError::runtime(format!("'{}' expects a number argument at {}", method, location))),
    }
}

fn arity_error(method: &str, expected: usize, location: &str) -> EvalError {
    EvalError::runtime(format!("'{}' expects {} argument(s) at {}", method, expected, location))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_push_returns_new_length() {
        let arr: ArrayRef = Arc::new(RwLock::new(vec![Value::Number(1.0)]));
        let result = array_method(&arr, "push", vec![Value::Number(2.0)], "t:1").unwrap();
        assert_eq!(result, Value::Number(2.0));
        assert_eq!(arr.read().unwrap().len(), 2);
    }

    #[test]
    fn string_slice_operates_on_codepoints_not_bytes() {
        let result = string_method("héllo", "slice", vec![Value::Number(0.0), Value::Number(2.0)], "t:1").unwrap();
        assert_eq!(result, Value::String("hé".into()));
    }

    #[test]
    fn negative_slice_indices_count_from_the_end() {
        let arr: ArrayRef = Arc::new(RwLock::new(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]));
        let result = array_method(&arr, "slice", vec![Value::Number(-2.0)], "t:1").unwrap();
        let Value::Array(items) = result else { panic!("expected array") };
        assert_eq!(items.read().unwrap().len(), 2);
    }
}

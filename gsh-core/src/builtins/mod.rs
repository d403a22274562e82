//! The built-in globals (§6): everything `EnvRef::root()` starts out
//! carrying before a script's own declarations are evaluated.
//!
//! Split from [`crate::interpreter`] because most of these are pure
//! `Value`-in-`Value`-out functions with no collaborator dependencies; the
//! handful that do need one (`env.*`, `input()`, `gsh.on`/`gsh.off`) are
//! wired up by `Interpreter::new` instead, which is the only place holding
//! both an [`crate::env::EnvRef`] and an [`crate::events::EventBus`].

pub mod datetime;

use std::io::BufRead;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::RuntimeError;
use crate::value::{Builtin, MapData, ObjectMap, Property, SetData, Value};

fn builtin(name: &str, func: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static) -> Value {
    Value::Builtin(Builtin { name: name.to_string(), func: Arc::new(func) })
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

fn expect_number(v: &Value, who: &str) -> Result<f64, RuntimeError> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(RuntimeError::new(format!("{} expects a number, got a {}", who, other.type_name()))),
    }
}

fn expect_string(v: &Value, who: &str) -> Result<String, RuntimeError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(RuntimeError::new(format!("{} expects a string, got a {}", who, other.type_name()))),
    }
}

/// `print(...values)`: a space-joined line written wherever `writer` points
/// (stdout in production, an in-memory buffer in tests).
pub fn print_builtin(writer: Arc<Mutex<dyn std::io::Write + Send>>) -> Value {
    builtin("print", move |args| {
        let line = args.iter().map(|v| v.to_display_string()).collect::<Vec<_>>().join(" ");
        let mut w = writer.lock().unwrap();
        writeln!(w, "{}", line).map_err(|e| RuntimeError::new(format!("print failed: {}", e)))?;
        Ok(Value::Null)
    })
}

/// `log.{debug,info,warn,error}`: tagged lines through `tracing`, matching
/// how the evaluator's own internal failures are already logged (event
/// handler errors, middleware short-circuits).
pub fn log_object() -> Value {
    let mut map = ObjectMap::new();
    for level in ["debug", "info", "warn", "error"] {
        let name = format!("log.{}", level);
        let func = builtin(&name, move |args| {
            let line = args.iter().map(|v| v.to_display_string()).collect::<Vec<_>>().join(" ");
            match level {
                "debug" => tracing::debug!("{}", line),
                "info" => tracing::info!("{}", line),
                "warn" => tracing::warn!("{}", line),
                _ => tracing::error!("{}", line),
            }
            Ok(Value::Null)
        });
        map.insert(level.to_string(), Property::read_only(func));
    }
    Value::object(map)
}

/// `JSON.{stringify,parse}` (§4.1 "JSON bridge").
pub fn json_object() -> Value {
    let mut map = ObjectMap::new();
    map.insert(
        "stringify".to_string(),
        Property::read_only(builtin("JSON.stringify", |args| Ok(Value::String(crate::value::stringify_json(&arg(args, 0)))))),
    );
    map.insert(
        "parse".to_string(),
        Property::read_only(builtin("JSON.parse", |args| {
            let text = expect_string(&arg(args, 0), "JSON.parse")?;
            crate::value::parse_json(&text).map_err(|e| RuntimeError::new(format!("JSON.parse failed: {}", e)))
        })),
    );
    Value::object(map)
}

/// `DateTime.{now,parse,format,diff}` (§6); instants are epoch-millisecond
/// numbers so they compose with ordinary arithmetic.
pub fn datetime_object() -> Value {
    let mut map = ObjectMap::new();
    map.insert(
        "now".to_string(),
        Property::read_only(builtin("DateTime.now", |_args| Ok(Value::Number(datetime::now_millis())))),
    );
    map.insert(
        "parse".to_string(),
        Property::read_only(builtin("DateTime.parse", |args| {
            let text = expect_string(&arg(args, 0), "DateTime.parse")?;
            datetime::parse(&text).map(Value::Number)
        })),
    );
    map.insert(
        "format".to_string(),
        Property::read_only(builtin("DateTime.format", |args| {
            let millis = expect_number(&arg(args, 0), "DateTime.format")?;
            let pattern = expect_string(&arg(args, 1), "DateTime.format")?;
            datetime::format(millis, &pattern).map(Value::String)
        })),
    );
    map.insert(
        "diff".to_string(),
        Property::read_only(builtin("DateTime.diff", |args| {
            let a = expect_number(&arg(args, 0), "DateTime.diff")?;
            let b = expect_number(&arg(args, 1), "DateTime.diff")?;
            Ok(Value::Number(datetime::diff(a, b)))
        })),
    );
    Value::object(map)
}

/// `Map()`: the constructor, called with no arguments (§6).
pub fn map_constructor() -> Value {
    builtin("Map", |_args| Ok(Value::Map(Arc::new(RwLock::new(MapData::new())))))
}

/// `Set()`: the constructor, called with no arguments (§6).
pub fn set_constructor() -> Value {
    builtin("Set", |_args| Ok(Value::Set(Arc::new(RwLock::new(SetData::new())))))
}

/// `input(prompt?)`: reads one line from `reader`, trimming a trailing
/// `\r\n`/`\n`. Extra arguments are a runtime error (§6, open question
/// resolved in favor of strict arity since every other built-in here is
/// strict about arity too).
pub fn input_builtin(reader: Arc<Mutex<dyn BufRead + Send>>, writer: Arc<Mutex<dyn std::io::Write + Send>>) -> Value {
    builtin("input", move |args| {
        if args.len() > 1 {
            return Err(RuntimeError::new("input() takes at most one argument"));
        }
        if let Some(prompt) = args.first() {
            let mut w = writer.lock().unwrap();
            write!(w, "{}", prompt.to_display_string()).ok();
            w.flush().ok();
        }
        let mut line = String::new();
        let n = reader
            .lock()
            .unwrap()
            .read_line(&mut line)
            .map_err(|e| RuntimeError::new(format!("input() failed: {}", e)))?;
        if n == 0 && line.is_empty() {
            return Ok(Value::Null);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Value::String(line))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn print_joins_values_with_spaces() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let p = print_builtin(buf.clone());
        if let Value::Builtin(b) = p {
            (b.func)(&[Value::String("a".into()), Value::Number(1.0)]).unwrap();
        }
        assert_eq!(String::from_utf8(buf.lock().unwrap().clone()).unwrap(), "a 1\n");
    }

    #[test]
    fn input_strips_trailing_crlf_but_keeps_interior_whitespace() {
        let reader: Arc<Mutex<dyn BufRead + Send>> = Arc::new(Mutex::new(Cursor::new(b"  hi there  \r\n".to_vec())));
        let writer = Arc::new(Mutex::new(Vec::new()));
        let input = input_builtin(reader, writer);
        if let Value::Builtin(b) = input {
            let result = (b.func)(&[]).unwrap();
            assert_eq!(result, Value::String("  hi there  ".into()));
        }
    }

    #[test]
    fn input_rejects_extra_arguments() {
        let reader: Arc<Mutex<dyn BufRead + Send>> = Arc::new(Mutex::new(Cursor::new(Vec::new())));
        let writer = Arc::new(Mutex::new(Vec::new()));
        let input = input_builtin(reader, writer);
        if let Value::Builtin(b) = input {
            assert!((b.func)(&[Value::Null, Value::Null]).is_err());
        }
    }

    #[test]
    fn json_object_round_trips_through_the_script_level_functions() {
        let json = json_object();
        let (stringify, parse) = match &json {
            Value::Object(map) => {
                let map = map.read().unwrap();
                (map.get("stringify").unwrap().value.clone(), map.get("parse").unwrap().value.clone())
            }
            _ => unreachable!(),
        };
        let text = match &stringify {
            Value::Builtin(b) => (b.func)(&[Value::Number(42.0)]).unwrap(),
            _ => unreachable!(),
        };
        let roundtrip = match &parse {
            Value::Builtin(b) => (b.func)(&[text]).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(roundtrip, Value::Number(42.0));
    }
}

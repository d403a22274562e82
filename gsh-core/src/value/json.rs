//! The `JSON` global (§4.1 "JSON bridge", §6): `JSON.stringify` / `JSON.parse`.
//!
//! Numbers always round-trip as floating point; round-trip equality holds
//! for any JSON-representable value tree (property 4).

use super::{ObjectMap, Property, Value};

pub fn stringify_json(value: &Value) -> String {
    let mut out = String::new();
    write_json(value, &mut out);
    out
}

fn write_json(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_json_number(*n)),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            let items = items.read().unwrap();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let map = map.read().unwrap();
            for (i, (k, prop)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_json(&prop.value, out);
            }
            out.push('}');
        }
        // Non-JSON kinds stringify via their canonical display form, quoted
        // as a string, so `JSON.stringify` never panics on a mixed value tree.
        other => write_json_string(&other.to_display_string(), out),
    }
}

fn format_json_number(n: f64) -> String {
    if n.is_finite() {
        if n == n.trunc() && n.abs() < 1e15 {
            format!("{}", n as i64)
        } else {
            format!("{}", n)
        }
    } else {
        "null".to_string()
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

pub fn parse_json(text: &str) -> Result<Value, String> {
    let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    Ok(from_serde_json(&parsed))
}

/// Converts a `serde_json::Value` directly into a script [`Value`], the way
/// [`parse_json`] does after deserializing text. Used by the MCP/ACP
/// managers and the provider registry to bridge wire JSON into script values
/// without a text round-trip.
pub fn value_from_json(v: &serde_json::Value) -> Value {
    from_serde_json(v)
}

/// The inverse of [`value_from_json`]: converts a script [`Value`] into
/// `serde_json::Value`, used to build MCP `tools/call` arguments and similar
/// wire payloads from script objects.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => {
            serde_json::Value::Array(items.read().unwrap().iter().map(value_to_json).collect())
        }
        Value::Object(map) => {
            let map = map.read().unwrap();
            let mut obj = serde_json::Map::new();
            for (k, prop) in map.iter() {
                obj.insert(k.clone(), value_to_json(&prop.value));
            }
            serde_json::Value::Object(obj)
        }
        other => serde_json::Value::String(other.to_display_string()),
    }
}

fn from_serde_json(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::array(items.iter().map(from_serde_json).collect()),
        serde_json::Value::Object(map) => {
            let mut out = ObjectMap::new();
            for (k, v) in map {
                out.insert(k.clone(), Property::new(from_serde_json(v)));
            }
            Value::object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_holds_for_json_representable_trees() {
        let mut obj = ObjectMap::new();
        obj.insert("name".into(), Property::new(Value::String("gsh".into())));
        obj.insert(
            "nums".into(),
            Property::new(Value::array(vec![Value::Number(1.0), Value::Number(2.5)])),
        );
        obj.insert("flag".into(), Property::new(Value::Bool(true)));
        obj.insert("nothing".into(), Property::new(Value::Null));
        let value = Value::object(obj);

        let text = stringify_json(&value);
        let parsed = parse_json(&text).unwrap();
        assert!(parsed.equals(&value));
    }

    #[test]
    fn stringify_escapes_control_characters_and_quotes() {
        let value = Value::String("line1\nline2\t\"quoted\"".into());
        let text = stringify_json(&value);
        assert_eq!(text, "\"line1\\nline2\\t\\\"quoted\\\"\"");
    }

    #[test]
    fn parse_numbers_are_always_floating_point() {
        let parsed = parse_json("42").unwrap();
        assert!(matches!(parsed, Value::Number(n) if n == 42.0));
    }
}

//! Canonical string rendering (§4.1): numbers render without trailing zeros,
//! object keys render in lexicographic order for stable test output, array
//! elements are joined with `", "`, and nested strings are JSON-escaped.

use super::Value;

pub fn render(value: &Value, nested: bool) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => render_number(*n),
        Value::String(s) => {
            if nested {
                super::stringify_json(value)
            } else {
                s.clone()
            }
        }
        Value::Array(items) => {
            let items = items.read().unwrap();
            let inner = items
                .iter()
                .map(|v| render(v, true))
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{}]", inner)
        }
        Value::Object(map) => {
            let map = map.read().unwrap();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner = keys
                .into_iter()
                .map(|k| format!("{}: {}", k, render(&map.get(k).unwrap().value, true)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{}}}", inner)
        }
        Value::Tool(t) => format!("<tool {}>", t.name),
        Value::Builtin(b) => format!("<builtin {}>", b.name),
        Value::Model(m) => format!("<model {}>", m.name),
        Value::Agent(a) => format!("<agent {}>", a.name),
        Value::Conversation(msgs) => format!("<conversation {} messages>", msgs.read().unwrap().len()),
        Value::Acp(a) => format!("<acp {}>", a.name),
        Value::AcpSession(s) => format!("<acp-session {}>", s.session_id()),
        Value::EnvProxy => "<env>".to_string(),
        Value::McpProxy(p) => format!("<mcp {}>", p.server_name),
        Value::Map(m) => format!("<map size={}>", m.read().unwrap().size()),
        Value::Set(s) => format!("<set size={}>", s.read().unwrap().size()),
    }
}

/// Numbers render without trailing zeros: integral values print without a
/// decimal point, everything else prints its shortest round-tripping form.
fn render_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{}", n);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_render_without_decimal() {
        assert_eq!(render_number(3.0), "3");
        assert_eq!(render_number(-3.0), "-3");
    }

    #[test]
    fn fractions_render_naturally() {
        assert_eq!(render_number(3.5), "3.5");
    }

    #[test]
    fn nested_strings_are_quoted_and_escaped() {
        let v = Value::array(vec![Value::String("a\"b".into())]);
        assert_eq!(render(&v, false), "[\"a\\\"b\"]");
    }

    #[test]
    fn object_keys_render_lexicographically() {
        let mut map = super::super::ObjectMap::new();
        map.insert("b".into(), super::super::Property::new(Value::Number(1.0)));
        map.insert("a".into(), super::super::Property::new(Value::Number(2.0)));
        let v = Value::object(map);
        assert_eq!(render(&v, false), "{a: 2, b: 1}");
    }
}

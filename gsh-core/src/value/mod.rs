//! The Value system (spec §3 "Value", §4.1 "Value system").
//!
//! [`Value`] is a tagged union covering every kind the script language can
//! produce: scalars (`null`, `boolean`, `number`, `string`), the two
//! reference-semantics collection kinds (`array`, `object`), first-class
//! callables (`tool`, `builtin`), the LLM-facing declarations (`model`,
//! `agent`, `conversation`), the subprocess-bound kinds (`acp`,
//! `acp-session`, an MCP proxy), a read-through process-environment proxy,
//! and the two script-exposed collection helpers (`map`, `set`).
//!
//! Arrays, objects, maps, sets, and the live subprocess-bound kinds are
//! reference types: cloning a [`Value`] of one of these kinds clones the
//! handle, not the data, so `a = b; a.push(1)` is visible through `b` too.
//! [`Value::deep_copy`] is the explicit operation that breaks aliasing.

mod json;
mod render;

use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

pub use json::{parse_json, stringify_json, value_from_json, value_to_json};

use crate::ast;
use crate::env::EnvRef;
use crate::provider::ChatMessage;

/// One property slot on an [`Value::Object`]: a value plus a read-only flag.
///
/// The read-only flag exists for builtin-filtered / frozen object literals;
/// ordinary `key: value` object literal entries are writable.
#[derive(Clone, Debug)]
pub struct Property {
    pub value: Value,
    pub read_only: bool,
}

impl Property {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            read_only: false,
        }
    }

    pub fn read_only(value: Value) -> Self {
        Self {
            value,
            read_only: true,
        }
    }
}

/// Insertion-ordered string-keyed property map backing [`Value::Object`].
///
/// Iteration order is insertion order internally (so debugging is
/// deterministic) but is never treated as script-observable: canonical
/// rendering and `JSON.stringify` sort keys lexicographically (§4.1).
pub type ObjectMap = IndexMap<String, Property>;

pub type ArrayRef = Arc<RwLock<Vec<Value>>>;
pub type ObjectRef = Arc<RwLock<ObjectMap>>;

/// A user-defined callable: `tool NAME(params) { body }`.
///
/// Captures its defining [`crate::env::Environment`] by reference (a
/// closure); the captured environment is what a call's isolated scope is
/// parented to (§3 "Lifecycles").
#[derive(Debug)]
pub struct ToolDef {
    pub name: String,
    pub params: Vec<ToolParam>,
    pub return_type: Option<String>,
    pub body: Arc<ast::Block>,
    pub closure: EnvRef,
}

#[derive(Clone, Debug)]
pub struct ToolParam {
    pub name: String,
    pub type_name: Option<String>,
}

/// A native callable: `(args) -> Result<Value, RuntimeError>`.
///
/// Builtins are synchronous by construction (`print`, `JSON.*`, `DateTime.*`,
/// string/array methods exposed as first-class values, ...); the
/// inherently-asynchronous external calls (provider, MCP, ACP) are modeled as
/// their own `Value` kinds and dispatched specially in `Evaluator::eval_call`
/// rather than through this type (§4.4).
pub type BuiltinFn = Arc<dyn Fn(&[Value]) -> Result<Value, crate::error::RuntimeError> + Send + Sync>;

#[derive(Clone)]
pub struct Builtin {
    pub name: String,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

/// `model NAME { provider, ... }`: a name, its raw config object, and the
/// provider handle resolved from `config.provider` at declaration time
/// (§4.5 — unknown providers fail fast at declaration, not at first use).
#[derive(Debug)]
pub struct ModelValue {
    pub name: String,
    pub config: ObjectRef,
    pub provider: Arc<dyn crate::provider::Provider>,
}

/// `agent NAME { model, systemPrompt, tools, ... }`.
#[derive(Debug)]
pub struct AgentValue {
    pub name: String,
    pub config: ObjectRef,
}

/// `acp NAME { command, args, env?, cwd? }`: a descriptor, not yet spawned.
#[derive(Debug, Clone)]
pub struct AcpConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
}

/// An MCP proxy value bound to a declared server name; member access returns
/// a per-tool call value (§4.8).
#[derive(Debug)]
pub struct McpProxy {
    pub server_name: String,
    pub manager: Arc<crate::mcp::McpManager>,
}

/// The discriminated value union (spec §3).
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Tool(Arc<ToolDef>),
    Builtin(Builtin),
    Model(Arc<ModelValue>),
    Agent(Arc<AgentValue>),
    Conversation(Arc<RwLock<Vec<ChatMessage>>>),
    Acp(Arc<AcpConfig>),
    AcpSession(Arc<crate::acp::AcpSessionHandle>),
    EnvProxy,
    McpProxy(Arc<McpProxy>),
    Map(Arc<RwLock<MapData>>),
    Set(Arc<RwLock<SetData>>),
}

/// Backing store for the script `Map()` constructor: an association list
/// compared via [`Value`] structural equality rather than `Hash`, since
/// arbitrary script values (including objects) are valid keys.
#[derive(Debug, Default)]
pub struct MapData {
    entries: Vec<(Value, Value)>,
}

impl MapData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.equals(key))
            .map(|(_, v)| v.clone())
    }

    pub fn set(&mut self, key: Value, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k.equals(&key)) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn has(&self, key: &Value) -> bool {
        self.entries.iter().any(|(k, _)| k.equals(key))
    }

    pub fn delete(&mut self, key: &Value) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.equals(key));
        self.entries.len() != before
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }
}

/// Backing store for the script `Set()` constructor.
#[derive(Debug, Default)]
pub struct SetData {
    members: Vec<Value>,
}

impl SetData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: Value) {
        if !self.members.iter().any(|v| v.equals(&value)) {
            self.members.push(value);
        }
    }

    pub fn has(&self, value: &Value) -> bool {
        self.members.iter().any(|v| v.equals(value))
    }

    pub fn delete(&mut self, value: &Value) -> bool {
        let before = self.members.len();
        self.members.retain(|v| !v.equals(value));
        self.members.len() != before
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[Value] {
        &self.members
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn object(map: ObjectMap) -> Self {
        Value::Object(Arc::new(RwLock::new(map)))
    }

    pub fn empty_object() -> Self {
        Value::object(ObjectMap::new())
    }

    /// The type tag used in error messages and by the script language's
    /// (hypothetical) `typeof`-style introspection.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Tool(_) => "tool",
            Value::Builtin(_) => "builtin",
            Value::Model(_) => "model",
            Value::Agent(_) => "agent",
            Value::Conversation(_) => "conversation",
            Value::Acp(_) => "acp",
            Value::AcpSession(_) => "acp-session",
            Value::EnvProxy => "env",
            Value::McpProxy(_) => "mcp",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
        }
    }

    /// Truthiness (§3 "Value invariants").
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.read().unwrap().is_empty(),
            Value::Object(o) => !o.read().unwrap().is_empty(),
            Value::Map(m) => m.read().unwrap().size() > 0,
            Value::Set(s) => s.read().unwrap().size() > 0,
            Value::AcpSession(s) => !s.is_closed() && s.has_messages(),
            _ => true,
        }
    }

    /// Structural equality (§3 "Value invariants", property 2).
    ///
    /// Numbers compare by IEEE equality, strings by byte identity, arrays
    /// and objects recursively by structural equality. Every other kind
    /// (tools, builtins, models, agents, acp/session/mcp handles, env proxy)
    /// compares by identity: two declarations with the same name are not
    /// equal unless they are literally the same captured value.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.read().unwrap();
                let b = b.read().unwrap();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.read().unwrap();
                let b = b.read().unwrap();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|pv| pv.value.equals(&v.value)))
            }
            (Value::Tool(a), Value::Tool(b)) => Arc::ptr_eq(a, b),
            (Value::Model(a), Value::Model(b)) => Arc::ptr_eq(a, b),
            (Value::Agent(a), Value::Agent(b)) => Arc::ptr_eq(a, b),
            (Value::Acp(a), Value::Acp(b)) => Arc::ptr_eq(a, b),
            (Value::AcpSession(a), Value::AcpSession(b)) => Arc::ptr_eq(a, b),
            (Value::McpProxy(a), Value::McpProxy(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Conversation(a), Value::Conversation(b)) => Arc::ptr_eq(a, b),
            (Value::EnvProxy, Value::EnvProxy) => true,
            (Value::Builtin(a), Value::Builtin(b)) => Arc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }

    /// Deep copy: recursive on arrays and objects, shared for every other
    /// kind (§4.1 "Deep copy", property 2: `deep_copy(v).equals(v)` for all
    /// `v`, but shares no mutable sub-structure with `v`).
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(a) => {
                let items = a.read().unwrap().iter().map(Value::deep_copy).collect();
                Value::array(items)
            }
            Value::Object(o) => {
                let map = o
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(k, p)| {
                        (
                            k.clone(),
                            Property {
                                value: p.value.deep_copy(),
                                read_only: p.read_only,
                            },
                        )
                    })
                    .collect();
                Value::object(map)
            }
            other => other.clone(),
        }
    }

    /// `deepMerge(base, override)` (§4.1). `self` is the base, `over` the
    /// override; returns a fresh, fully independent object.
    pub fn deep_merge(&self, over: &Value) -> Value {
        match (self, over) {
            (Value::Object(base), Value::Object(over)) => {
                let base = base.read().unwrap();
                let over = over.read().unwrap();
                let mut result = ObjectMap::new();
                let mut keys: Vec<&String> = base.keys().collect();
                for k in over.keys() {
                    if !base.contains_key(k) {
                        keys.push(k);
                    }
                }
                for key in keys {
                    let base_prop = base.get(key);
                    let over_prop = over.get(key);
                    let merged = match (base_prop, over_prop) {
                        (Some(b), Some(o)) => b.value.deep_merge(&o.value),
                        (Some(b), None) => b.value.deep_copy(),
                        (None, Some(o)) => o.value.deep_copy(),
                        (None, None) => unreachable!(),
                    };
                    result.insert(key.clone(), Property::new(merged));
                }
                Value::object(result)
            }
            // Non-object override always wins; non-object base is replaced
            // wholesale by a deep copy of the override (or the base itself
            // when override is absent is handled by the caller passing Null).
            (_, Value::Null) => self.deep_copy(),
            (_, other) => other.deep_copy(),
        }
    }

    /// Canonical string rendering used by `print`, string coercion, and
    /// stack/catch messages (§4.1).
    pub fn to_display_string(&self) -> String {
        render::render(self, false)
    }

    /// Rendering used when a value appears nested inside an array/object
    /// literal's rendering (strings are quoted and escaped).
    pub fn to_debug_string(&self) -> String {
        render::render(self, true)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.equals(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_by_ieee_equality() {
        assert!(Value::Number(1.0).equals(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn truthiness_matches_spec_table() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(Value::Number(-1.0).truthy());
        assert!(!Value::String(String::new()).truthy());
        assert!(Value::String("x".into()).truthy());
        assert!(!Value::array(vec![]).truthy());
        assert!(Value::array(vec![Value::Null]).truthy());
        assert!(!Value::empty_object().truthy());
    }

    #[test]
    fn deep_copy_is_equal_but_independent() {
        let inner = Value::array(vec![Value::Number(1.0)]);
        let outer = Value::array(vec![inner.clone()]);
        let copy = outer.deep_copy();
        assert!(copy.equals(&outer));

        if let Value::Array(items) = &copy {
            if let Value::Array(inner_copy) = &items.read().unwrap()[0] {
                inner_copy.write().unwrap().push(Value::Number(2.0));
            }
        }
        // Mutating the copy's nested array must not affect the original.
        if let Value::Array(items) = &outer {
            if let Value::Array(inner_orig) = &items.read().unwrap()[0] {
                assert_eq!(inner_orig.read().unwrap().len(), 1);
            }
        }
    }

    #[test]
    fn deep_merge_preserves_unrelated_keys() {
        let mut base = ObjectMap::new();
        let mut experimental = ObjectMap::new();
        experimental.insert("a".into(), Property::new(Value::Bool(false)));
        experimental.insert("b".into(), Property::new(Value::Bool(false)));
        base.insert("prompt".into(), Property::new(Value::String("gsh> ".into())));
        base.insert("experimental".into(), Property::new(Value::object(experimental)));
        let base = Value::object(base);

        let mut override_experimental = ObjectMap::new();
        override_experimental.insert("a".into(), Property::new(Value::Bool(true)));
        let mut over = ObjectMap::new();
        over.insert(
            "experimental".into(),
            Property::new(Value::object(override_experimental)),
        );
        let over = Value::object(over);

        let merged = base.deep_merge(&over);
        let Value::Object(merged_map) = &merged else {
            panic!("expected object");
        };
        let merged_map = merged_map.read().unwrap();
        assert_eq!(
            merged_map.get("prompt").unwrap().value.to_display_string(),
            "gsh> "
        );
        let Value::Object(exp) = &merged_map.get("experimental").unwrap().value else {
            panic!("expected object");
        };
        let exp = exp.read().unwrap();
        assert!(exp.get("a").unwrap().value.truthy());
        assert!(!exp.get("b").unwrap().value.truthy());
    }

    #[test]
    fn deep_merge_does_not_mutate_inputs() {
        let base = Value::empty_object();
        let mut over_map = ObjectMap::new();
        over_map.insert("x".into(), Property::new(Value::Number(1.0)));
        let over = Value::object(over_map);

        let merged = base.deep_merge(&over);
        if let Value::Object(m) = &merged {
            m.write().unwrap().insert("y".into(), Property::new(Value::Number(2.0)));
        }
        if let Value::Object(b) = &base {
            assert!(b.read().unwrap().get("y").is_none());
        }
        if let Value::Object(o) = &over {
            assert!(o.read().unwrap().get("y").is_none());
        }
    }
}

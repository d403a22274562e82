//! Middleware chain (§4.7): composable `(ctx, next)` input transformers.
//!
//! Mirrors the teacher's `NodeMiddleware::around_run(node_id, state, inner)`
//! shape, where `inner` is the continuation: here `next` is a script
//! [`Value::Builtin`] wrapping the recursive call into the remainder of the
//! chain, so a middleware tool can call it like any other value.
//!
//! **Short-circuit resolution (Open Question, §9):** a middleware's own
//! return value is inspected for `{handled, input}` fields. A middleware that
//! calls `next(ctx)` and returns its result transparently propagates whatever
//! the downstream chain decided. A middleware that returns without calling
//! `next` ends the chain there, with `handled` defaulting to `false` and
//! `input` to the (possibly mutated) `ctx.input` — equivalent to falling off
//! the end of the chain one middleware early, which keeps "mutate and return"
//! and "call next and return" both meaningful without a second signal.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::error::RuntimeError;
use crate::events::Invoker;
use crate::value::{ObjectMap, Property, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct MiddlewareResult {
    pub handled: bool,
    pub input: String,
}

impl MiddlewareResult {
    pub fn to_value(&self) -> Value {
        let mut map = ObjectMap::new();
        map.insert("handled".into(), Property::new(Value::Bool(self.handled)));
        map.insert("input".into(), Property::new(Value::String(self.input.clone())));
        Value::object(map)
    }
}

#[derive(Clone)]
struct Entry {
    id: String,
    tool: Value,
}

#[derive(Default)]
pub struct MiddlewareChain {
    entries: RwLock<Vec<Entry>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        MiddlewareChain { entries: RwLock::new(Vec::new()) }
    }

    /// `Use(tool) -> id`: appends to the chain.
    pub fn use_tool(&self, tool: Value) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.write().unwrap().push(Entry { id: id.clone(), tool });
        id
    }

    /// `Remove(id)`.
    pub fn remove(&self, id: &str) {
        self.entries.write().unwrap().retain(|e| e.id != id);
    }

    /// `RemoveByTool(tool)`: removes every entry whose tool equals `tool`
    /// (structural equality, matching value-kind equality rules).
    pub fn remove_by_tool(&self, tool: &Value) {
        self.entries.write().unwrap().retain(|e| !e.tool.equals(tool));
    }

    /// `Clear`.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// `ExecuteChain(input)`: threads `input` through the chain in
    /// registration order via `invoke`, which calls a tool value the way the
    /// evaluator would.
    pub fn execute_chain(&self, input: String, invoke: &Invoker) -> Result<MiddlewareResult, RuntimeError> {
        let entries = self.entries.read().unwrap().clone();
        run_from(&entries, 0, input, invoke)
    }
}

fn run_from(entries: &[Entry], index: usize, input: String, invoke: &Invoker) -> Result<MiddlewareResult, RuntimeError> {
    let Some(entry) = entries.get(index) else {
        return Ok(MiddlewareResult { handled: false, input });
    };

    let mut ctx_map = ObjectMap::new();
    ctx_map.insert("input".into(), Property::new(Value::String(input)));
    let ctx = Value::object(ctx_map);

    let rest: Vec<Entry> = entries[index + 1..].to_vec();
    let ctx_for_next = ctx.clone();
    let invoke_for_next = invoke.clone();
    let next_fn: crate::value::BuiltinFn = Arc::new(move |_args| {
        let current_input = read_ctx_input(&ctx_for_next);
        let result = run_from(&rest, 0, current_input, &invoke_for_next)?;
        Ok(result.to_value())
    });
    let next_value = Value::Builtin(crate::value::Builtin { name: "next".into(), func: next_fn });

    let returned = invoke(&entry.tool, &[ctx.clone(), next_value])?;

    let handled = value_bool_field(&returned, "handled").unwrap_or(false);
    let input = value_string_field(&returned, "input").unwrap_or_else(|| read_ctx_input(&ctx));
    Ok(MiddlewareResult { handled, input })
}

fn read_ctx_input(ctx: &Value) -> String {
    value_string_field(ctx, "input").unwrap_or_default()
}

fn value_bool_field(value: &Value, key: &str) -> Option<bool> {
    match value {
        Value::Object(map) => match map.read().unwrap().get(key).map(|p| p.value.clone()) {
            Some(Value::Bool(b)) => Some(b),
            _ => None,
        },
        _ => None,
    }
}

fn value_string_field(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(map) => match map.read().unwrap().get(key).map(|p| p.value.clone()) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough_invoker() -> Invoker {
        Arc::new(|tool, args| match tool {
            Value::Builtin(b) => (b.func)(args),
            _ => Ok(Value::Null),
        })
    }

    #[test]
    fn empty_chain_reports_not_handled_with_original_input() {
        let chain = MiddlewareChain::new();
        let invoke = passthrough_invoker();
        let result = chain.execute_chain("hello".into(), &invoke).unwrap();
        assert_eq!(result, MiddlewareResult { handled: false, input: "hello".into() });
    }

    #[test]
    fn a_middleware_returning_handled_short_circuits() {
        let chain = MiddlewareChain::new();
        let short_circuit = Value::Builtin(crate::value::Builtin {
            name: "short_circuit".into(),
            func: Arc::new(|_args| {
                let mut map = ObjectMap::new();
                map.insert("handled".into(), Property::new(Value::Bool(true)));
                Ok(Value::object(map))
            }),
        });
        let never_called = Value::Builtin(crate::value::Builtin {
            name: "never".into(),
            func: Arc::new(|_args| panic!("should not run after short-circuit")),
        });
        chain.use_tool(short_circuit);
        chain.use_tool(never_called);

        let invoke: Invoker = Arc::new(|tool, args| match tool {
            Value::Builtin(b) => (b.func)(args),
            _ => Ok(Value::Null),
        });
        let result = chain.execute_chain("hello".into(), &invoke).unwrap();
        assert!(result.handled);
    }

    #[test]
    fn calling_next_propagates_the_downstream_result() {
        let chain = MiddlewareChain::new();
        let passthrough = Value::Builtin(crate::value::Builtin {
            name: "passthrough".into(),
            func: Arc::new(|args| {
                let next = &args[1];
                match next {
                    Value::Builtin(b) => (b.func)(&[]),
                    _ => Ok(Value::Null),
                }
            }),
        });
        chain.use_tool(passthrough);
        let invoke = passthrough_invoker();
        let result = chain.execute_chain("hello".into(), &invoke).unwrap();
        assert_eq!(result, MiddlewareResult { handled: false, input: "hello".into() });
    }
}

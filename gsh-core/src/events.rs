//! Event bus (§4.6): named events, each with an insertion-ordered list of
//! handlers (script tool values), dispatched through a caller-supplied
//! invoker so this module never depends on the evaluator directly.
//!
//! Emission snapshots the handler list under a read lock and releases it
//! before dispatching, so a handler that registers or removes handlers for
//! the same event during its own invocation never deadlocks (§9 "Concurrent
//! event bus with callable handlers").

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::error::RuntimeError;
use crate::value::{ObjectMap, Property, Value};

/// Invokes a handler value (a tool or builtin) with one argument, the way
/// the evaluator's call dispatch would. Supplied by the interpreter so the
/// bus stays ignorant of tool/closure machinery.
pub type Invoker = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

struct Handler {
    id: String,
    tool: Value,
}

/// Canonical event names (§4.6), used by the agent loop and ACP manager.
pub mod names {
    pub const AGENT_START: &str = "agent.start";
    pub const AGENT_END: &str = "agent.end";
    pub const AGENT_ITERATION_START: &str = "agent.iteration.start";
    pub const AGENT_ITERATION_END: &str = "agent.iteration.end";
    pub const AGENT_TOOL_PENDING: &str = "agent.tool.pending";
    pub const AGENT_TOOL_START: &str = "agent.tool.start";
    pub const AGENT_TOOL_END: &str = "agent.tool.end";
    pub const AGENT_CHUNK: &str = "agent.chunk";
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus { handlers: RwLock::new(HashMap::new()) }
    }

    /// Registers `handler` for `event`, returning an opaque id usable with
    /// [`EventBus::off`].
    pub fn on(&self, event: &str, handler: Value) -> String {
        let id = Uuid::new_v4().to_string();
        self.handlers
            .write()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(Handler { id: id.clone(), tool: handler });
        id
    }

    /// Removes one handler by id, or every handler for `event` when `id` is
    /// `None`/empty (§4.6).
    pub fn off(&self, event: &str, id: Option<&str>) {
        let mut handlers = self.handlers.write().unwrap();
        match id {
            Some(id) if !id.is_empty() => {
                if let Some(list) = handlers.get_mut(event) {
                    list.retain(|h| h.id != id);
                }
            }
            _ => {
                handlers.remove(event);
            }
        }
    }

    /// Builds the single context object argument passed to every handler.
    pub fn context(fields: Vec<(&str, Value)>) -> Value {
        let mut map = ObjectMap::new();
        for (k, v) in fields {
            map.insert(k.to_string(), Property::new(v));
        }
        Value::object(map)
    }

    /// Snapshots the handler list for `event` and invokes each one with
    /// `ctx`, outside the read lock. Handler errors are logged and do not
    /// abort emission or the emitter (§4.6).
    pub fn emit(&self, event: &str, ctx: Value, invoke: &Invoker) {
        let snapshot: Vec<Value> = {
            let handlers = self.handlers.read().unwrap();
            handlers
                .get(event)
                .map(|list| list.iter().map(|h| h.tool.clone()).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            if let Err(err) = invoke(&handler, &[ctx.clone()]) {
                tracing::warn!(event, error = %err, "event handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_invoker(counter: Arc<AtomicUsize>) -> Invoker {
        Arc::new(move |_handler, _args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
    }

    #[test]
    fn every_handler_registered_at_emission_time_runs_exactly_once() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.on("agent.start", Value::Null);
        bus.on("agent.start", Value::Null);
        let invoker = counting_invoker(counter.clone());
        bus.emit("agent.start", Value::Null, &invoker);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_handler_removed_before_emission_is_not_invoked() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.on("agent.end", Value::Null);
        bus.off("agent.end", Some(&id));
        let invoker = counting_invoker(counter.clone());
        bus.emit("agent.end", Value::Null, &invoker);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_with_no_id_clears_every_handler_for_the_event() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.on("agent.chunk", Value::Null);
        bus.on("agent.chunk", Value::Null);
        bus.off("agent.chunk", None);
        let invoker = counting_invoker(counter.clone());
        bus.emit("agent.chunk", Value::Null, &invoker);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_errors_do_not_abort_emission() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.on("agent.end", Value::Null);
        bus.on("agent.end", Value::Null);
        let counter_clone = counter.clone();
        let invoker: Invoker = Arc::new(move |_h, _a| {
            let n = counter_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(RuntimeError::new("boom"))
            } else {
                Ok(Value::Null)
            }
        });
        bus.emit("agent.end", Value::Null, &invoker);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

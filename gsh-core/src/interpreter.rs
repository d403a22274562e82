//! The top-level script runner (§2 "component table", §6 "Built-in
//! globals"): owns the root [`EnvRef`], the collaborator managers, and the
//! shared [`Evaluator`], and wires the built-in globals into the root scope
//! before a script's own declarations run.
//!
//! One `Interpreter` corresponds to one script run; nothing here is meant to
//! be reused across unrelated scripts (a fresh `Interpreter` is cheap to
//! build, mirroring the teacher's own one-graph-per-run construction).

use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};

use crate::acp::AcpManager;
use crate::ast::Program;
use crate::builtins;
use crate::env::EnvRef;
use crate::error::RuntimeError;
use crate::events::{names, EventBus};
use crate::eval::Evaluator;
use crate::mcp::McpManager;
use crate::provider::ProviderRegistry;
use crate::value::{Builtin, ObjectMap, Property, Value};

/// Constructs an [`Interpreter`] with stdout/stdin wired to the process's
/// real streams. Tests build one with [`Interpreter::with_io`] instead, over
/// in-memory buffers.
pub struct Interpreter {
    pub env: EnvRef,
    pub evaluator: Arc<Evaluator>,
    pub events: Arc<EventBus>,
    pub mcp: Arc<McpManager>,
    pub acp: Arc<AcpManager>,
}

impl Interpreter {
    pub fn new() -> Self {
        let stdout: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(std::io::stdout()));
        let stdin: Arc<Mutex<dyn BufRead + Send>> = Arc::new(Mutex::new(BufReader::new(std::io::stdin())));
        Self::with_io(stdout, stdin)
    }

    pub fn with_io(writer: Arc<Mutex<dyn Write + Send>>, reader: Arc<Mutex<dyn BufRead + Send>>) -> Self {
        let events = Arc::new(EventBus::new());
        let mcp = Arc::new(McpManager::new());
        let acp = Arc::new(AcpManager::new());
        let providers = Arc::new(ProviderRegistry::with_defaults());
        let evaluator = Evaluator::new_shared(events.clone(), Arc::new(crate::middleware::MiddlewareChain::new()), mcp.clone(), acp.clone(), providers);

        let env = EnvRef::root();
        install_globals(&env, &events, writer, reader);

        Interpreter { env, evaluator, events, mcp, acp }
    }

    /// Runs a whole program in the root scope, returning the value of its
    /// last statement (§4.3 "Program").
    pub fn run(&self, program: &Program) -> Result<Value, RuntimeError> {
        self.evaluator.eval_program(program, &self.env).map_err(|e| match e.as_catchable() {
            Ok(script_err) => match script_err {
                crate::error::ScriptError::Runtime(e) => e,
                crate::error::ScriptError::Thrown(t) => RuntimeError::new(t.value.to_display_string()),
            },
            Err(control_flow) => control_flow.escaped(),
        })
    }

    /// Shuts down every spawned MCP/ACP subprocess. Idempotent; safe to call
    /// even if no server/agent was ever declared.
    pub fn close(&self) {
        self.mcp.shutdown();
        self.acp.shutdown();
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.close();
    }
}

fn install_globals(env: &EnvRef, events: &Arc<EventBus>, writer: Arc<Mutex<dyn Write + Send>>, reader: Arc<Mutex<dyn BufRead + Send>>) {
    env.set("print", builtins::print_builtin(writer.clone()));
    env.set("log", builtins::log_object());
    env.set("JSON", builtins::json_object());
    env.set("DateTime", builtins::datetime_object());
    env.set("Map", builtins::map_constructor());
    env.set("Set", builtins::set_constructor());
    env.set("input", builtins::input_builtin(reader, writer));
    env.set("env", Value::EnvProxy);
    env.set("gsh", gsh_object(events.clone()));
}

/// `gsh.on(event, handler)` / `gsh.off(event, id?)` (§4.6), the only built-in
/// that talks straight to the [`EventBus`] rather than being a pure
/// `Value -> Value` function.
fn gsh_object(events: Arc<EventBus>) -> Value {
    let mut map = ObjectMap::new();

    let on_events = events.clone();
    let on = Value::Builtin(Builtin {
        name: "gsh.on".to_string(),
        func: Arc::new(move |args| {
            let event = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => return Err(RuntimeError::new("gsh.on(event, handler) expects a string event name")),
            };
            if !is_known_event(&event) {
                return Err(RuntimeError::new(format!("unknown event '{}'", event)));
            }
            let handler = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(Value::String(on_events.on(&event, handler)))
        }),
    });

    let off_events = events;
    let off = Value::Builtin(Builtin {
        name: "gsh.off".to_string(),
        func: Arc::new(move |args| {
            let event = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => return Err(RuntimeError::new("gsh.off(event, id?) expects a string event name")),
            };
            let id = match args.get(1) {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            };
            off_events.off(&event, id.as_deref());
            Ok(Value::Null)
        }),
    });

    map.insert("on".to_string(), Property::read_only(on));
    map.insert("off".to_string(), Property::read_only(off));
    Value::object(map)
}

fn is_known_event(name: &str) -> bool {
    matches!(
        name,
        names::AGENT_START
            | names::AGENT_END
            | names::AGENT_ITERATION_START
            | names::AGENT_ITERATION_END
            | names::AGENT_TOOL_PENDING
            | names::AGENT_TOOL_START
            | names::AGENT_TOOL_END
            | names::AGENT_CHUNK
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fresh() -> (Interpreter, Arc<Mutex<Vec<u8>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let writer: Arc<Mutex<dyn Write + Send>> = out.clone();
        let reader: Arc<Mutex<dyn BufRead + Send>> = Arc::new(Mutex::new(Cursor::new(Vec::new())));
        (Interpreter::with_io(writer, reader), out)
    }

    #[test]
    fn builtin_names_are_filtered_out_of_user_variable_enumeration() {
        let (interp, _out) = fresh();
        interp.env.define("x", Value::Number(1.0)).unwrap();
        assert_eq!(interp.env.keys(), vec!["x".to_string()]);
    }

    #[test]
    fn gsh_on_rejects_an_unknown_event_name() {
        let (interp, _out) = fresh();
        let gsh = interp.env.get("gsh").unwrap();
        let on = match &gsh {
            Value::Object(map) => map.read().unwrap().get("on").unwrap().value.clone(),
            _ => unreachable!(),
        };
        let err = match &on {
            Value::Builtin(b) => (b.func)(&[Value::String("not.a.real.event".into()), Value::Null]).unwrap_err(),
            _ => unreachable!(),
        };
        assert!(err.message.contains("unknown event"));
    }

    #[test]
    fn gsh_on_then_off_removes_exactly_that_handler() {
        let (interp, _out) = fresh();
        let gsh = interp.env.get("gsh").unwrap();
        let (on, off) = match &gsh {
            Value::Object(map) => {
                let map = map.read().unwrap();
                (map.get("on").unwrap().value.clone(), map.get("off").unwrap().value.clone())
            }
            _ => unreachable!(),
        };
        let id = match &on {
            Value::Builtin(b) => (b.func)(&[Value::String(names::AGENT_START.into()), Value::Null]).unwrap(),
            _ => unreachable!(),
        };
        if let Value::Builtin(b) = &off {
            (b.func)(&[Value::String(names::AGENT_START.into()), id]).unwrap();
        }
        // No direct way to assert zero handlers without an invoker; the
        // event bus's own tests cover emission semantics exhaustively.
    }

    #[test]
    fn close_is_idempotent_when_no_server_or_agent_was_ever_declared() {
        let (interp, _out) = fresh();
        interp.close();
        interp.close();
    }
}

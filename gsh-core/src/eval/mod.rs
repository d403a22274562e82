//! The evaluator (§4.3 "Evaluator", §4.4 "Call dispatch"): a synchronous
//! tree-walker over the AST, special-casing the inherently-asynchronous
//! collaborator calls (provider chat, MCP `tools/call`, ACP `session/*`) by
//! bridging them onto the current thread with
//! `tokio::task::block_in_place` + `Handle::current().block_on`, mirroring
//! the teacher's own `task::block_in_place(|| self.list_tools_sync())`
//! pattern (used for the MCP manager's `spawn_blocking` bridge).
//!
//! Kept synchronous by design rather than `async fn` all the way down: a
//! tree-walker has no natural yield points, and making every call site
//! `async` would force `Box::pin`-ing every recursive `eval_expr` call for
//! no benefit (§9 "Generator/async constructs" is explicitly out of scope).

mod expr;
mod methods;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::acp::AcpManager;
use crate::agent_loop::{self, AgentLoopOptions};
use crate::ast::{self, AssignTarget, Block, Expr, Stmt};
use crate::env::EnvRef;
use crate::error::{ControlFlow, EvalError, EvalResult, RuntimeError, StackFrame};
use crate::events::{EventBus, Invoker};
use crate::mcp::{McpManager, McpServerConfig};
use crate::middleware::MiddlewareChain;
use crate::pipe::{self, PipeContext};
use crate::provider::{ChatMessage, ChatRole, ProviderRegistry};
use crate::value::{AgentValue, ModelValue, ObjectMap, ObjectRef, Property, ToolDef, ToolParam, Value};

/// Owns every collaborator an agent/tool/middleware declaration can wire
/// into, shared across every scope of one running script (§2 component
/// table, §5 "one interpreter instance per script run").
///
/// Always held behind an `Arc` (see [`Evaluator::new_shared`]): its own
/// `invoke` field is a callback that calls back into itself, built with
/// `Arc::new_cyclic` so the evaluator can hand out an [`Invoker`] to the
/// event bus / middleware chain / agent loop without any of those modules
/// depending on `Evaluator` directly.
pub struct Evaluator {
    pub events: Arc<EventBus>,
    pub middleware: Arc<MiddlewareChain>,
    pub mcp: Arc<McpManager>,
    pub acp: Arc<AcpManager>,
    pub providers: Arc<ProviderRegistry>,
    invoke: Invoker,
}

impl Evaluator {
    pub fn new_shared(events: Arc<EventBus>, middleware: Arc<MiddlewareChain>, mcp: Arc<McpManager>, acp: Arc<AcpManager>, providers: Arc<ProviderRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let invoke: Invoker = Arc::new(move |handler, args| {
                let evaluator = weak.upgrade().expect("evaluator dropped while still in use");
                evaluator.call_value(handler.clone(), args.to_vec(), "<event>").map_err(|e| match e {
                    EvalError::Script(crate::error::ScriptError::Runtime(e)) => e,
                    EvalError::Script(crate::error::ScriptError::Thrown(t)) => RuntimeError::new(t.value.to_display_string()),
                    EvalError::ControlFlow(c) => c.escaped(),
                })
            });
            Evaluator { events, middleware, mcp, acp, providers, invoke }
        })
    }

    /// A clone of the self-calling [`Invoker`] built at construction time.
    pub fn invoker(&self) -> Invoker {
        self.invoke.clone()
    }

    pub fn eval_program(&self, program: &ast::Program, env: &EnvRef) -> EvalResult<Value> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            last = self.eval_stmt(stmt, env)?;
        }
        Ok(last)
    }

    /// Runs `block` in a fresh non-isolated child scope of `env` (§3
    /// "Environment": if/while/for/try bodies share the caller's isolation
    /// boundary, only tool-call frames introduce a new one).
    fn eval_block(&self, block: &Block, env: &EnvRef) -> EvalResult<Value> {
        let scope = env.child();
        let mut last = Value::Null;
        for stmt in &block.statements {
            last = self.eval_stmt(stmt, &scope)?;
        }
        Ok(last)
    }

    fn eval_stmt(&self, stmt: &Stmt, env: &EnvRef) -> EvalResult<Value> {
        match stmt {
            Stmt::Assignment { target, value, location } => {
                let value = self.eval_expr(value, env)?;
                self.assign(target, value.clone(), env, location)?;
                Ok(value)
            }
            Stmt::Expression(expr) => self.eval_expr(expr, env),
            Stmt::If { condition, then_branch, else_branch } => {
                if self.eval_expr(condition, env)?.truthy() {
                    self.eval_block(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.eval_block(else_branch, env)
                } else {
                    Ok(Value::Null)
                }
            }
            Stmt::While { condition, body } => {
                while self.eval_expr(condition, env)?.truthy() {
                    match self.eval_block(body, env) {
                        Ok(_) => {}
                        Err(EvalError::ControlFlow(ControlFlow::Break)) => break,
                        Err(EvalError::ControlFlow(ControlFlow::Continue)) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }
            Stmt::ForOf { binding, iterable, body, location } => self.eval_for_of(binding, iterable, body, env, location),
            Stmt::Break => Err(EvalError::ControlFlow(ControlFlow::Break)),
            Stmt::Continue => Err(EvalError::ControlFlow(ControlFlow::Continue)),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Err(EvalError::ControlFlow(ControlFlow::Return(value)))
            }
            Stmt::Block(block) => self.eval_block(block, env),
            Stmt::ToolDecl(decl) => self.eval_tool_decl(decl, env),
            Stmt::ModelDecl(decl) => self.eval_model_decl(decl, env),
            Stmt::AgentDecl(decl) => self.eval_agent_decl(decl, env),
            Stmt::AcpDecl(decl) => self.eval_acp_decl(decl, env),
            Stmt::McpDecl(decl) => self.eval_mcp_decl(decl, env),
            Stmt::Try { body, catch_param, catch_body, finally_body } => self.eval_try(body, catch_param.as_deref(), catch_body.as_ref(), finally_body.as_ref(), env),
            Stmt::Throw(expr) => {
                let value = self.eval_expr(expr, env)?;
                Err(crate::error::ThrownError::new(value).into())
            }
        }
    }

    fn eval_for_of(&self, binding: &str, iterable: &Expr, body: &Block, env: &EnvRef, location: &str) -> EvalResult<Value> {
        let iterable = self.eval_expr(iterable, env)?;
        let items: Vec<Value> = match &iterable {
            Value::Array(items) => items.read().unwrap().clone(),
            Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            other => {
                return Err(EvalError::runtime(format!(
                    "a {} is not iterable at {}",
                    other.type_name(),
                    location
                )))
            }
        };
        for item in items {
            let scope = env.child();
            scope.set(binding, item);
            match self.eval_block(body, &scope) {
                Ok(_) => {}
                Err(EvalError::ControlFlow(ControlFlow::Break)) => break,
                Err(EvalError::ControlFlow(ControlFlow::Continue)) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Null)
    }

    fn eval_try(&self, body: &Block, catch_param: Option<&str>, catch_body: Option<&Block>, finally_body: Option<&Block>, env: &EnvRef) -> EvalResult<Value> {
        let body_result = self.eval_block(body, env);
        let mut outcome = match body_result {
            Err(EvalError::Script(script_err)) => match (catch_param, catch_body) {
                (Some(param), Some(catch_body)) => {
                    let catch_env = env.child();
                    let _ = catch_env.define(param, script_err.to_catch_value());
                    self.eval_block(catch_body, &catch_env)
                }
                _ => Err(EvalError::Script(script_err)),
            },
            other => other,
        };

        if let Some(finally_body) = finally_body {
            // finally always runs; its own error overrides whatever the
            // try/catch produced (§4.3 "try/catch/finally").
            if let Err(finally_err) = self.eval_block(finally_body, env) {
                outcome = Err(finally_err);
            }
        }
        outcome
    }

    fn eval_tool_decl(&self, decl: &ast::ToolDecl, env: &EnvRef) -> EvalResult<Value> {
        let tool = ToolDef {
            name: decl.name.clone(),
            params: decl.params.iter().map(|p| ToolParam { name: p.name.clone(), type_name: p.type_name.clone() }).collect(),
            return_type: decl.return_type.clone(),
            body: decl.body.clone(),
            closure: env.clone(),
        };
        self.define(env, &decl.name, Value::Tool(Arc::new(tool)))
    }

    fn eval_model_decl(&self, decl: &ast::ModelDecl, env: &EnvRef) -> EvalResult<Value> {
        let config = self.eval_expr(&decl.config, env)?;
        let config_ref = self.expect_object(config, "model")?;
        let provider_name = {
            let map = config_ref.read().unwrap();
            match map.get("provider").map(|p| &p.value) {
                Some(Value::String(s)) => s.clone(),
                _ => return Err(EvalError::runtime("model config requires a string 'provider'")),
            }
        };
        let provider = self.providers.resolve(&provider_name)?;
        let model = ModelValue { name: decl.name.clone(), config: config_ref, provider };
        self.define(env, &decl.name, Value::Model(Arc::new(model)))
    }

    fn eval_agent_decl(&self, decl: &ast::AgentDecl, env: &EnvRef) -> EvalResult<Value> {
        let config = self.eval_expr(&decl.config, env)?;
        let config_ref = self.expect_object(config, "agent")?;
        let agent = AgentValue { name: decl.name.clone(), config: config_ref };
        self.define(env, &decl.name, Value::Agent(Arc::new(agent)))
    }

    fn eval_acp_decl(&self, decl: &ast::AcpDecl, env: &EnvRef) -> EvalResult<Value> {
        let config = self.eval_expr(&decl.config, env)?;
        let config_ref = self.expect_object(config, "acp")?;
        let config = AcpManager::config_from_object(&decl.name, &config_ref)?;
        self.acp.declare(config.clone())?;
        self.define(env, &decl.name, Value::Acp(Arc::new(config)))
    }

    fn eval_mcp_decl(&self, decl: &ast::McpDecl, env: &EnvRef) -> EvalResult<Value> {
        let config = self.eval_expr(&decl.config, env)?;
        let config_ref = self.expect_object(config, "mcp")?;
        let server_config = McpServerConfig::from_object(&config_ref)?;
        block_on_current(self.mcp.declare(decl.name.clone(), server_config))?;
        let proxy = crate::value::McpProxy { server_name: decl.name.clone(), manager: self.mcp.clone() };
        self.define(env, &decl.name, Value::McpProxy(Arc::new(proxy)))
    }

    fn expect_object(&self, value: Value, what: &str) -> EvalResult<ObjectRef> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(EvalError::runtime(format!("{} declaration config must be an object, found {}", what, other.type_name()))),
        }
    }

    fn define(&self, env: &EnvRef, name: &str, value: Value) -> EvalResult<Value> {
        env.define(name, value.clone()).map_err(EvalError::runtime)?;
        Ok(value)
    }

    fn assign(&self, target: &AssignTarget, value: Value, env: &EnvRef, location: &str) -> EvalResult<()> {
        match target {
            AssignTarget::Identifier(name) => {
                env.update(name, value);
                Ok(())
            }
            AssignTarget::Member { object, property } => {
                let receiver = self.eval_expr(object, env)?;
                match receiver {
                    Value::Object(map) => methods::set_object_property(&map, property, value, location),
                    other => Err(EvalError::runtime(format!("cannot set property '{}' on a {} at {}", property, other.type_name(), location))),
                }
            }
            AssignTarget::Index { object, index } => {
                let receiver = self.eval_expr(object, env)?;
                let index_value = self.eval_expr(index, env)?;
                match receiver {
                    Value::Array(items) => {
                        let Value::Number(n) = index_value else {
                            return Err(EvalError::runtime(format!("array index must be a number at {}", location)));
                        };
                        let mut items = items.write().unwrap();
                        let i = n as usize;
                        if i >= items.len() {
                            return Err(EvalError::runtime(format!("array index out of bounds at {}", location)));
                        }
                        items[i] = value;
                        Ok(())
                    }
                    Value::Object(map) => {
                        let Value::String(key) = index_value else {
                            return Err(EvalError::runtime(format!("object index must be a string at {}", location)));
                        };
                        methods::set_object_property(&map, &key, value, location)
                    }
                    other => Err(EvalError::runtime(format!("cannot index-assign a {} at {}", other.type_name(), location))),
                }
            }
        }
    }

    fn eval_expr(&self, expr: &Expr, env: &EnvRef) -> EvalResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(expr::literal_value(lit)),
            Expr::Identifier(name, location) => env
                .get(name)
                .ok_or_else(|| EvalError::runtime(format!("undefined name '{}' at {}", name, location))),
            Expr::Binary { op, left, right, location } => self.eval_binary(*op, left, right, env, location),
            Expr::Unary { op, operand, location } => {
                let value = self.eval_expr(operand, env)?;
                expr::apply_unary(*op, value, location)
            }
            Expr::Array(items) => {
                let values = items.iter().map(|e| self.eval_expr(e, env)).collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::array(values))
            }
            Expr::Object(fields) => {
                let mut map = ObjectMap::new();
                for (key, expr) in fields {
                    let value = self.eval_expr(expr, env)?;
                    map.insert(key.clone(), Property::new(value));
                }
                Ok(Value::object(map))
            }
            Expr::Call { callee, args, location } => self.eval_call(callee, args, location, env),
            Expr::Member { object, property, location } => {
                let receiver = self.eval_expr(object, env)?;
                methods::member_value(&receiver, property, location)
            }
            Expr::Index { object, index, location } => self.eval_index(object, index, env, location),
            Expr::Ternary { condition, then_expr, else_expr } => {
                if self.eval_expr(condition, env)?.truthy() {
                    self.eval_expr(then_expr, env)
                } else {
                    self.eval_expr(else_expr, env)
                }
            }
            Expr::Pipe { left, right, location } => self.eval_pipe_expr(left, right, env, location),
        }
    }

    fn eval_binary(&self, op: ast::BinaryOp, left: &Expr, right: &Expr, env: &EnvRef, location: &str) -> EvalResult<Value> {
        match op {
            // Short-circuit forms return the deciding operand verbatim,
            // not a coerced boolean (§4.3).
            ast::BinaryOp::And => {
                let left = self.eval_expr(left, env)?;
                if !left.truthy() {
                    Ok(left)
                } else {
                    self.eval_expr(right, env)
                }
            }
            ast::BinaryOp::Or => {
                let left = self.eval_expr(left, env)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval_expr(right, env)
                }
            }
            op => {
                let left = self.eval_expr(left, env)?;
                let right = self.eval_expr(right, env)?;
                expr::apply_binary(op, left, right, location)
            }
        }
    }

    fn eval_index(&self, object: &Expr, index: &Expr, env: &EnvRef, location: &str) -> EvalResult<Value> {
        let receiver = self.eval_expr(object, env)?;
        let index_value = self.eval_expr(index, env)?;
        match receiver {
            Value::Array(items) => {
                let Value::Number(n) = index_value else {
                    return Err(EvalError::runtime(format!("array index must be a number at {}", location)));
                };
                let items = items.read().unwrap();
                let i = n as i64;
                let i = if i < 0 { i + items.len() as i64 } else { i };
                if i < 0 || i as usize >= items.len() {
                    return Err(EvalError::runtime(format!("array index out of bounds at {}", location)));
                }
                Ok(items[i as usize].clone())
            }
            Value::String(s) => {
                let Value::Number(n) = index_value else {
                    return Err(EvalError::runtime(format!("string index must be a number at {}", location)));
                };
                s.chars()
                    .nth(n as usize)
                    .map(|c| Value::String(c.to_string()))
                    .ok_or_else(|| EvalError::runtime(format!("string index out of bounds at {}", location)))
            }
            Value::Object(map) => {
                let Value::String(key) = index_value else {
                    return Err(EvalError::runtime(format!("object index must be a string at {}", location)));
                };
                map.read()
                    .unwrap()
                    .get(&key)
                    .map(|p| p.value.clone())
                    .ok_or_else(|| EvalError::runtime(format!("no such property '{}' at {}", key, location)))
            }
            other => Err(EvalError::runtime(format!("cannot index a {} at {}", other.type_name(), location))),
        }
    }

    /// Call dispatch (§4.4). `callee` is an arbitrary expression, not just
    /// an identifier: `obj.method(args)` parses as `Call{callee: Member{...}}`.
    /// Member callees whose receiver is an MCP proxy, an ACP session, or one
    /// of the built-in collection kinds are special-cased here so their
    /// methods never need to exist as standalone [`Value`]s; everything
    /// else evaluates generically and is invoked through [`Self::call_value`].
    fn eval_call(&self, callee: &Expr, args: &[Expr], location: &str, env: &EnvRef) -> EvalResult<Value> {
        if let Expr::Member { object, property, .. } = callee {
            let receiver = self.eval_expr(object, env)?;
            match &receiver {
                Value::McpProxy(proxy) => {
                    let arguments = self.call_arguments_object(args, env)?;
                    let result = block_on_current(proxy.manager.call_tool(&proxy.server_name, property, arguments))?;
                    return Ok(result);
                }
                Value::AcpSession(session) => {
                    return match property.as_str() {
                        "close" => {
                            session.close();
                            Ok(Value::Null)
                        }
                        other => Err(EvalError::runtime(format!("an acp-session has no method '{}' at {}", other, location))),
                    };
                }
                Value::Array(items) => {
                    return self.call_array_method(items, property, args, env, location);
                }
                Value::String(s) => {
                    let values = self.eval_args(args, env)?;
                    return methods::string_method(s, property, values, location);
                }
                Value::Map(data) => {
                    let values = self.eval_args(args, env)?;
                    return methods::map_method(data, property, values, location);
                }
                Value::Set(data) => {
                    let values = self.eval_args(args, env)?;
                    return methods::set_method(data, property, values, location);
                }
                _ => {
                    let member = methods::member_value(&receiver, property, location)?;
                    let values = self.eval_args(args, env)?;
                    return self.call_value(member, values, location);
                }
            }
        }

        let callee_value = self.eval_expr(callee, env)?;
        let values = self.eval_args(args, env)?;
        self.call_value(callee_value, values, location)
    }

    /// Higher-order array methods need to call back into the evaluator for
    /// their callback argument, so they live here rather than in the pure
    /// `methods` table.
    fn call_array_method(&self, items: &crate::value::ArrayRef, method: &str, args: &[Expr], env: &EnvRef, location: &str) -> EvalResult<Value> {
        match method {
            "map" => {
                let callback = self.eval_expr(args.first().ok_or_else(|| EvalError::runtime(format!("'map' expects a callback at {}", location)))?, env)?;
                let snapshot = items.read().unwrap().clone();
                let mapped = snapshot
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.call_value(callback.clone(), vec![item, Value::Number(i as f64)], location))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::array(mapped))
            }
            "filter" => {
                let callback = self.eval_expr(args.first().ok_or_else(|| EvalError::runtime(format!("'filter' expects a callback at {}", location)))?, env)?;
                let snapshot = items.read().unwrap().clone();
                let mut kept = Vec::new();
                for (i, item) in snapshot.into_iter().enumerate() {
                    let result = self.call_value(callback.clone(), vec![item.clone(), Value::Number(i as f64)], location)?;
                    if result.truthy() {
                        kept.push(item);
                    }
                }
                Ok(Value::array(kept))
            }
            "forEach" => {
                let callback = self.eval_expr(args.first().ok_or_else(|| EvalError::runtime(format!("'forEach' expects a callback at {}", location)))?, env)?;
                let snapshot = items.read().unwrap().clone();
                for (i, item) in snapshot.into_iter().enumerate() {
                    self.call_value(callback.clone(), vec![item, Value::Number(i as f64)], location)?;
                }
                Ok(Value::Null)
            }
            "reduce" => {
                let callback = self.eval_expr(args.first().ok_or_else(|| EvalError::runtime(format!("'reduce' expects a callback at {}", location)))?, env)?;
                let snapshot = items.read().unwrap().clone();
                let mut iter = snapshot.into_iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial_expr) => self.eval_expr(initial_expr, env)?,
                    None => iter.next().map(|(_, v)| v).ok_or_else(|| EvalError::runtime(format!("'reduce' of empty array with no initial value at {}", location)))?,
                };
                for (i, item) in iter {
                    acc = self.call_value(callback.clone(), vec![acc, item, Value::Number(i as f64)], location)?;
                }
                Ok(acc)
            }
            other => {
                let values = self.eval_args(args, env)?;
                methods::array_method(items, other, values, location)
            }
        }
    }

    fn eval_args(&self, args: &[Expr], env: &EnvRef) -> EvalResult<Vec<Value>> {
        args.iter().map(|a| self.eval_expr(a, env)).collect()
    }

    /// Builds the single-object `arguments` value an MCP `tools/call`
    /// expects (§4.8): one positional argument is forwarded as-is if it is
    /// already an object, otherwise every argument is wrapped.
    fn call_arguments_object(&self, args: &[Expr], env: &EnvRef) -> EvalResult<Value> {
        let values = self.eval_args(args, env)?;
        match values.as_slice() {
            [Value::Object(_)] => Ok(values.into_iter().next().unwrap()),
            _ => Ok(Value::array(values)),
        }
    }

    pub fn call_value(&self, callee: Value, args: Vec<Value>, location: &str) -> EvalResult<Value> {
        match callee {
            Value::Tool(tool) => self.call_tool(&tool, args, location),
            Value::Builtin(b) => (b.func)(&args).map_err(EvalError::from),
            other => Err(EvalError::runtime(format!("a {} is not callable at {}", other.type_name(), location))),
        }
    }

    /// Calls a script tool in an isolated scope parented to its closure
    /// (§3 "Lifecycles"); a stack frame is pushed only here, at the tool
    /// call boundary, never for plain blocks (§4.3, scenario S2).
    fn call_tool(&self, tool: &Arc<ToolDef>, args: Vec<Value>, location: &str) -> EvalResult<Value> {
        if args.len() != tool.params.len() {
            return Err(EvalError::runtime(format!(
                "'{}' expects {} argument(s), got {} at {}",
                tool.name,
                tool.params.len(),
                args.len(),
                location
            )));
        }
        let call_env = tool.closure.isolated_child();
        for (param, arg) in tool.params.iter().zip(args.into_iter()) {
            call_env.set(&param.name, arg);
        }
        match self.eval_block(&tool.body, &call_env) {
            Ok(value) => Ok(value),
            Err(EvalError::ControlFlow(ControlFlow::Return(value))) => Ok(value),
            Err(EvalError::ControlFlow(other)) => Err(other.escaped().into()),
            Err(EvalError::Script(script_err)) => Err(EvalError::Script(script_err.push_frame(StackFrame::new(tool.name.clone(), location.to_string())))),
        }
    }

    fn eval_pipe_expr(&self, left: &Expr, right: &Expr, env: &EnvRef, location: &str) -> EvalResult<Value> {
        let lhs = self.eval_expr(left, env)?;
        let rhs = self.eval_expr(right, env)?;
        let ctx = PipeContext {
            providers: self.providers.clone(),
            events: self.events.clone(),
            acp: self.acp.clone(),
            invoke: self.invoker(),
        };
        pipe::eval_pipe(lhs, rhs, &ctx).map_err(|e| e.push_frame(StackFrame::top_level(location.to_string())).into())
    }

    /// Runs an agent over a conversation through the shared agent loop,
    /// used both by `gsh.on`-style event handler dispatch (via `invoker`)
    /// and available for a future REPL/CLI entry point.
    pub async fn run_agent(&self, agent: &AgentValue, conversation: Vec<ChatMessage>, options: AgentLoopOptions) -> Result<Vec<ChatMessage>, RuntimeError> {
        agent_loop::run_agent_loop(agent, conversation, &self.providers, &self.events, &self.invoke, options).await
    }
}

/// Bridges an async collaborator call onto the current synchronous thread,
/// the same bridge [`crate::pipe`] uses.
fn block_on_current<F: std::future::Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| Handle::current().block_on(future))
}

/// Helper the rest of the crate uses to build a one-message conversation
/// from a bare user prompt (§4.10 "string | agent").
pub fn single_user_message(text: impl Into<String>) -> Vec<ChatMessage> {
    vec![ChatMessage { role: ChatRole::User, content: text.into(), name: None }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_evaluator() -> Arc<Evaluator> {
        Evaluator::new_shared(
            Arc::new(EventBus::new()),
            Arc::new(MiddlewareChain::new()),
            Arc::new(McpManager::new()),
            Arc::new(AcpManager::new()),
            Arc::new(ProviderRegistry::new()),
        )
    }

    fn tool_decl(name: &str, params: Vec<&str>, body: Block) -> ast::ToolDecl {
        ast::ToolDecl {
            name: name.to_string(),
            params: params.into_iter().map(|p| ast::ParamDecl { name: p.to_string(), type_name: None }).collect(),
            return_type: None,
            body: Arc::new(body),
        }
    }

    #[test]
    fn division_by_zero_reports_a_runtime_error() {
        let evaluator = fresh_evaluator();
        let env = EnvRef::root();
        let expr = Expr::Binary {
            op: ast::BinaryOp::Div,
            left: Box::new(Expr::number(1.0)),
            right: Box::new(Expr::number(0.0)),
            location: "script:1".into(),
        };
        let err = evaluator.eval_expr(&expr, &env).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn for_of_iterates_strings_by_codepoint() {
        let evaluator = fresh_evaluator();
        let env = EnvRef::root();
        env.define("out", Value::array(vec![])).unwrap();
        let body = Block {
            statements: vec![Stmt::Expression(Expr::Call {
                callee: Box::new(Expr::Member {
                    object: Box::new(Expr::ident("out")),
                    property: "push".into(),
                    location: "t:1".into(),
                }),
                args: vec![Expr::ident("c")],
                location: "t:1".into(),
            })],
        };
        let stmt = Stmt::ForOf {
            binding: "c".into(),
            iterable: Expr::string("héy"),
            body,
            location: "t:1".into(),
        };
        evaluator.eval_stmt(&stmt, &env).unwrap();
        let Value::Array(items) = env.get("out").unwrap() else { panic!("expected array") };
        assert_eq!(items.read().unwrap().len(), 3);
    }

    #[test]
    fn a_runtime_error_gains_one_frame_per_tool_call_crossed() {
        let evaluator = fresh_evaluator();
        let env = EnvRef::root();
        let inner = tool_decl(
            "inner",
            vec![],
            Block {
                statements: vec![Stmt::Expression(Expr::Binary {
                    op: ast::BinaryOp::Div,
                    left: Box::new(Expr::number(1.0)),
                    right: Box::new(Expr::number(0.0)),
                    location: "inner:1".into(),
                })],
            },
        );
        evaluator.eval_stmt(&Stmt::ToolDecl(inner), &env).unwrap();
        let outer = tool_decl(
            "outer",
            vec![],
            Block {
                statements: vec![Stmt::Expression(Expr::Call {
                    callee: Box::new(Expr::ident("inner")),
                    args: vec![],
                    location: "outer:1".into(),
                })],
            },
        );
        evaluator.eval_stmt(&Stmt::ToolDecl(outer), &env).unwrap();

        let call = Expr::Call { callee: Box::new(Expr::ident("outer")), args: vec![], location: "script:1".into() };
        let err = evaluator.eval_expr(&call, &env).unwrap_err();
        let EvalError::Script(crate::error::ScriptError::Runtime(runtime_err)) = err else { panic!("expected runtime error") };
        assert_eq!(runtime_err.frames().len(), 2);
        assert_eq!(runtime_err.frames()[0].function, "inner");
        assert_eq!(runtime_err.frames()[1].function, "outer");
    }

    #[test]
    fn try_catch_binds_a_thrown_value_verbatim() {
        let evaluator = fresh_evaluator();
        let env = EnvRef::root();
        let stmt = Stmt::Try {
            body: Block { statements: vec![Stmt::Throw(Expr::number(42.0))] },
            catch_param: Some("e".into()),
            catch_body: Some(Block { statements: vec![Stmt::Expression(Expr::ident("e"))] }),
            finally_body: None,
        };
        let result = evaluator.eval_stmt(&stmt, &env).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn finally_runs_and_its_own_error_overrides_the_try_result() {
        let evaluator = fresh_evaluator();
        let env = EnvRef::root();
        let stmt = Stmt::Try {
            body: Block { statements: vec![Stmt::Expression(Expr::number(1.0))] },
            catch_param: None,
            catch_body: None,
            finally_body: Some(Block { statements: vec![Stmt::Throw(Expr::string("finally failed"))] }),
        };
        let err = evaluator.eval_stmt(&stmt, &env).unwrap_err();
        let EvalError::Script(crate::error::ScriptError::Thrown(thrown)) = err else { panic!("expected thrown error") };
        assert_eq!(thrown.value, Value::String("finally failed".into()));
    }

    #[test]
    fn and_short_circuits_and_returns_the_deciding_operand() {
        let evaluator = fresh_evaluator();
        let env = EnvRef::root();
        let expr = Expr::Binary {
            op: ast::BinaryOp::And,
            left: Box::new(Expr::number(0.0)),
            right: Box::new(Expr::ident("never_evaluated")),
            location: "t:1".into(),
        };
        let result = evaluator.eval_expr(&expr, &env).unwrap();
        assert_eq!(result, Value::Number(0.0));
    }
}

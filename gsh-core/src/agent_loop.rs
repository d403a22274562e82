//! Agent loop (§4.11): multi-turn tool-calling execution of one agent value
//! over a conversation, with lifecycle events emitted through the event bus.
//!
//! Grounded in the same shape as the teacher's `ReactRunner::invoke` /
//! `stream_with_callback` (think -> act -> observe, looped until the model
//! stops requesting tools), flattened from a compiled graph into a direct
//! loop since the script language has no user-level graph-building surface
//! to target (§9 "Generator/async constructs").

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::events::{names, EventBus, Invoker};
use crate::provider::{ChatMessage, ChatRequest, ChatRole, ProviderRegistry, ResolvedModelConfig, ToolCall, ToolSchema};
use crate::value::{AgentValue, ObjectMap, Property, ToolDef, Value};

/// The default iteration cap (§9 Open Questions: 25, exposed as a knob here
/// rather than hardcoded since the source may expose it as config).
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Calls an externally-hosted tool not declared as a script tool (agent
/// loop input per §4.11 "optional callbacks").
pub type ExternalToolExecutor = Arc<dyn Fn(&str, Value) -> Result<Value, RuntimeError> + Send + Sync>;

#[derive(Clone)]
pub struct AgentLoopOptions {
    pub max_iterations: usize,
    pub streaming: bool,
    pub cancellation: Option<CancellationToken>,
    pub external_tool_executor: Option<ExternalToolExecutor>,
}

impl Default for AgentLoopOptions {
    fn default() -> Self {
        AgentLoopOptions {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            streaming: false,
            cancellation: None,
            external_tool_executor: None,
        }
    }
}

/// Runs `agent` over `conversation`, dispatching any requested tool calls
/// and returning the updated conversation. `invoke` calls a script tool
/// value exactly the way the evaluator's own call dispatch would.
pub async fn run_agent_loop(
    agent: &AgentValue,
    mut conversation: Vec<ChatMessage>,
    providers: &ProviderRegistry,
    events: &EventBus,
    invoke: &Invoker,
    options: AgentLoopOptions,
) -> Result<Vec<ChatMessage>, RuntimeError> {
    let config = agent.config.read().unwrap();

    let model_value = match config.get("model").map(|p| &p.value) {
        Some(Value::Model(m)) => m.clone(),
        _ => return Err(RuntimeError::new("agent config requires a 'model'")),
    };
    let system_prompt = match config.get("systemPrompt").map(|p| &p.value) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let tools: Vec<Arc<ToolDef>> = match config.get("tools").map(|p| &p.value) {
        Some(Value::Array(items)) => items
            .read()
            .unwrap()
            .iter()
            .filter_map(|v| match v {
                Value::Tool(t) => Some(t.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    drop(config);

    let model_config = ResolvedModelConfig::from_object(&model_value.config);
    let tool_schemas: Vec<ToolSchema> = tools.iter().map(|t| tool_schema(t)).collect();

    let start_ctx = EventBus::context(vec![
        ("agent", Value::String(agent.name.clone())),
        ("conversation", conversation_value(&conversation)),
        ("model", Value::String(model_config.model.clone())),
    ]);
    events.emit(names::AGENT_START, start_ctx, invoke);

    let result = run_iterations(
        agent,
        &mut conversation,
        &model_config,
        &model_value.provider,
        &tools,
        &tool_schemas,
        system_prompt.as_deref(),
        events,
        invoke,
        &options,
    )
    .await;

    let end_ctx = match &result {
        Ok(()) => EventBus::context(vec![("conversation", conversation_value(&conversation))]),
        Err(err) => EventBus::context(vec![
            ("conversation", conversation_value(&conversation)),
            ("error", Value::String(err.message.clone())),
        ]),
    };
    events.emit(names::AGENT_END, end_ctx, invoke);

    result.map(|()| conversation)
}

#[allow(clippy::too_many_arguments)]
async fn run_iterations(
    agent: &AgentValue,
    conversation: &mut Vec<ChatMessage>,
    model_config: &ResolvedModelConfig,
    provider: &Arc<dyn crate::provider::Provider>,
    tools: &[Arc<ToolDef>],
    tool_schemas: &[ToolSchema],
    system_prompt: Option<&str>,
    events: &EventBus,
    invoke: &Invoker,
    options: &AgentLoopOptions,
) -> Result<(), RuntimeError> {
    for iteration in 0..options.max_iterations {
        if let Some(token) = &options.cancellation {
            if token.is_cancelled() {
                return Err(RuntimeError::new("agent loop cancelled"));
            }
        }

        let iter_ctx = EventBus::context(vec![("iteration", Value::Number(iteration as f64))]);
        events.emit(names::AGENT_ITERATION_START, iter_ctx, invoke);

        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if let Some(prompt) = system_prompt {
            messages.push(ChatMessage { role: ChatRole::System, content: prompt.to_string(), name: None });
        }
        messages.extend(conversation.iter().cloned());

        let request = ChatRequest {
            model: model_config.clone(),
            messages,
            tools: tool_schemas.to_vec(),
        };

        let response = if options.streaming {
            stream_chat(provider, &request, events, invoke).await?
        } else {
            provider.chat(&request).await?
        };

        conversation.push(ChatMessage {
            role: ChatRole::Assistant,
            content: response.content.clone(),
            name: None,
        });

        if response.finish_reason != "tool_calls" || response.tool_calls.is_empty() {
            let end_ctx = EventBus::context(vec![("iteration", Value::Number(iteration as f64))]);
            events.emit(names::AGENT_ITERATION_END, end_ctx, invoke);
            return Ok(());
        }

        for call in &response.tool_calls {
            dispatch_tool_call(call, agent, tools, events, invoke, options)?;
        }

        let end_ctx = EventBus::context(vec![("iteration", Value::Number(iteration as f64))]);
        events.emit(names::AGENT_ITERATION_END, end_ctx, invoke);
    }

    Err(RuntimeError::new(format!(
        "agent loop exceeded maximum iterations ({})",
        options.max_iterations
    )))
}

fn dispatch_tool_call(
    call: &ToolCall,
    _agent: &AgentValue,
    tools: &[Arc<ToolDef>],
    events: &EventBus,
    invoke: &Invoker,
    options: &AgentLoopOptions,
) -> Result<(), RuntimeError> {
    let start_ctx = EventBus::context(vec![
        ("id", Value::String(call.id.clone())),
        ("name", Value::String(call.name.clone())),
        ("arguments", crate::value::value_from_json(&call.arguments)),
    ]);
    events.emit(names::AGENT_TOOL_START, start_ctx, invoke);

    let outcome = invoke_one_tool(call, tools, invoke, options);

    let (status, result_value) = match &outcome {
        Ok(v) => ("completed", v.clone()),
        Err(e) => ("failed", Value::String(e.message.clone())),
    };
    let end_ctx = EventBus::context(vec![
        ("id", Value::String(call.id.clone())),
        ("name", Value::String(call.name.clone())),
        ("status", Value::String(status.to_string())),
        ("result", result_value.clone()),
    ]);
    events.emit(names::AGENT_TOOL_END, end_ctx, invoke);

    Ok(())
}

fn invoke_one_tool(
    call: &ToolCall,
    tools: &[Arc<ToolDef>],
    invoke: &Invoker,
    options: &AgentLoopOptions,
) -> Result<Value, RuntimeError> {
    if let Some(tool) = tools.iter().find(|t| t.name == call.name) {
        let args = arguments_for_tool(tool, &call.arguments);
        return invoke(&Value::Tool(tool.clone()), &args);
    }
    if let Some(executor) = &options.external_tool_executor {
        return executor(&call.name, crate::value::value_from_json(&call.arguments));
    }
    Err(RuntimeError::new(format!("no such tool '{}'", call.name)))
}

/// Maps a tool call's JSON-object arguments onto the tool's declared
/// positional parameters by name; a single-parameter tool receives the whole
/// arguments object verbatim.
fn arguments_for_tool(tool: &ToolDef, arguments: &serde_json::Value) -> Vec<Value> {
    if tool.params.len() == 1 {
        return vec![crate::value::value_from_json(arguments)];
    }
    tool.params
        .iter()
        .map(|p| {
            arguments
                .get(&p.name)
                .map(crate::value::value_from_json)
                .unwrap_or(Value::Null)
        })
        .collect()
}

async fn stream_chat(
    provider: &Arc<dyn crate::provider::Provider>,
    request: &ChatRequest,
    events: &EventBus,
    invoke: &Invoker,
) -> Result<crate::provider::ChatResponse, RuntimeError> {
    let (tx, mut rx) = mpsc::channel(16);
    let chat_future = provider.streaming_chat(request, Some(tx));
    tokio::pin!(chat_future);

    loop {
        tokio::select! {
            response = &mut chat_future => {
                while let Ok(chunk) = rx.try_recv() {
                    emit_chunk(events, invoke, &chunk.delta);
                }
                return response;
            }
            chunk = rx.recv() => {
                match chunk {
                    Some(chunk) => emit_chunk(events, invoke, &chunk.delta),
                    None => continue,
                }
            }
        }
    }
}

fn emit_chunk(events: &EventBus, invoke: &Invoker, delta: &str) {
    let ctx = EventBus::context(vec![("content", Value::String(delta.to_string()))]);
    events.emit(names::AGENT_CHUNK, ctx, invoke);
}

fn tool_schema(tool: &ToolDef) -> ToolSchema {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in &tool.params {
        properties.insert(param.name.clone(), json_type_for(param.type_name.as_deref()));
        required.push(serde_json::Value::String(param.name.clone()));
    }
    ToolSchema {
        name: tool.name.clone(),
        description: None,
        parameters: serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn json_type_for(type_name: Option<&str>) -> serde_json::Value {
    match type_name {
        Some("string") => serde_json::json!({ "type": "string" }),
        Some("number") => serde_json::json!({ "type": "number" }),
        Some("boolean") => serde_json::json!({ "type": "boolean" }),
        Some(t) if t.ends_with("[]") => serde_json::json!({ "type": "array" }),
        _ => serde_json::json!({}),
    }
}

fn conversation_value(conversation: &[ChatMessage]) -> Value {
    let items = conversation
        .iter()
        .map(|m| {
            let mut map = ObjectMap::new();
            map.insert("role".into(), Property::new(Value::String(m.role.as_str().to_string())));
            map.insert("content".into(), Property::new(Value::String(m.content.clone())));
            if let Some(name) = &m.name {
                map.insert("name".into(), Property::new(Value::String(name.clone())));
            }
            Value::object(map)
        })
        .collect();
    Value::array(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc as StdArc, Mutex};

    struct StubProvider {
        replies: Mutex<Vec<crate::provider::ChatResponse>>,
    }

    #[async_trait]
    impl crate::provider::Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<crate::provider::ChatResponse, RuntimeError> {
            Ok(self.replies.lock().unwrap().remove(0))
        }
    }

    fn noop_invoker() -> Invoker {
        StdArc::new(|_h, _a| Ok(Value::Null))
    }

    fn agent_with(provider: StubProvider) -> AgentValue {
        let mut model_config = ObjectMap::new();
        model_config.insert("apiKey".into(), Property::new(Value::String("key".into())));
        let model = StdArc::new(crate::value::ModelValue {
            name: "m".into(),
            config: StdArc::new(std::sync::RwLock::new(model_config)),
            provider: StdArc::new(provider),
        });
        let mut agent_config = ObjectMap::new();
        agent_config.insert("model".into(), Property::new(Value::Model(model)));
        AgentValue {
            name: "a".into(),
            config: StdArc::new(std::sync::RwLock::new(agent_config)),
        }
    }

    #[tokio::test]
    async fn emits_matched_start_end_and_iteration_events() {
        let provider = StubProvider {
            replies: Mutex::new(vec![crate::provider::ChatResponse {
                content: "hello".into(),
                finish_reason: "stop".into(),
                usage: None,
                tool_calls: vec![],
            }]),
        };
        let agent = agent_with(provider);
        let events = EventBus::new();
        let seen = StdArc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.on(
            names::AGENT_START,
            Value::Builtin(crate::value::Builtin {
                name: "spy".into(),
                func: StdArc::new({
                    let seen = seen_clone.clone();
                    move |_a| {
                        seen.lock().unwrap().push("start");
                        Ok(Value::Null)
                    }
                }),
            }),
        );
        events.on(
            names::AGENT_END,
            Value::Builtin(crate::value::Builtin {
                name: "spy".into(),
                func: StdArc::new({
                    let seen = seen_clone.clone();
                    move |_a| {
                        seen.lock().unwrap().push("end");
                        Ok(Value::Null)
                    }
                }),
            }),
        );
        let invoke: Invoker = StdArc::new(|tool, args| match tool {
            Value::Builtin(b) => (b.func)(args),
            _ => Ok(Value::Null),
        });

        let conversation = vec![ChatMessage { role: ChatRole::User, content: "hi".into(), name: None }];
        let result = run_agent_loop(&agent, conversation, &crate::provider::ProviderRegistry::new(), &events, &invoke, AgentLoopOptions::default())
            .await
            .unwrap();

        assert_eq!(result.last().unwrap().content, "hello");
        assert_eq!(*seen.lock().unwrap(), vec!["start", "end"]);
    }

    #[tokio::test]
    async fn exceeding_the_iteration_cap_still_emits_agent_end() {
        let mut replies = Vec::new();
        for _ in 0..3 {
            replies.push(crate::provider::ChatResponse {
                content: "thinking".into(),
                finish_reason: "tool_calls".into(),
                usage: None,
                tool_calls: vec![ToolCall { id: "1".into(), name: "missing".into(), arguments: serde_json::json!({}) }],
            });
        }
        let provider = StubProvider { replies: Mutex::new(replies) };
        let agent = agent_with(provider);
        let events = EventBus::new();
        let invoke = noop_invoker();
        let conversation = vec![ChatMessage { role: ChatRole::User, content: "hi".into(), name: None }];
        let options = AgentLoopOptions { max_iterations: 3, ..Default::default() };
        let err = run_agent_loop(&agent, conversation, &crate::provider::ProviderRegistry::new(), &events, &invoke, options)
            .await
            .unwrap_err();
        assert!(err.message.contains("exceeded maximum iterations"));
    }
}

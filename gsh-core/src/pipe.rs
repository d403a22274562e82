//! Pipe semantics (§4.10): the `lhs | rhs` operator's type-pair dispatch
//! table. Every pair not enumerated here fails with a generic type-pair
//! error (property 8, scenario S6).
//!
//! Calls out to the (async) agent loop and ACP manager via
//! `tokio::task::block_in_place` + `Handle::current().block_on`, the same
//! bridge the evaluator uses for every other collaborator call, since the
//! pipe operator itself is evaluated from synchronous expression code.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::acp::AcpManager;
use crate::agent_loop::{self, AgentLoopOptions};
use crate::error::RuntimeError;
use crate::events::{EventBus, Invoker};
use crate::provider::{ChatMessage, ChatRole, ProviderRegistry};
use crate::value::Value;

pub struct PipeContext {
    pub providers: Arc<ProviderRegistry>,
    pub events: Arc<EventBus>,
    pub acp: Arc<AcpManager>,
    pub invoke: Invoker,
}

/// Evaluates `lhs | rhs`, blocking the calling (synchronous) thread on
/// whichever collaborator call the pair requires.
pub fn eval_pipe(lhs: Value, rhs: Value, ctx: &PipeContext) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::String(text), Value::Agent(agent)) => {
            let conversation = vec![ChatMessage { role: ChatRole::User, content: text, name: None }];
            let updated = run_agent_blocking(&agent, conversation, ctx)?;
            let reply = updated
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::Assistant)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(Value::String(reply))
        }
        (Value::String(text), Value::Conversation(conv)) => {
            let mut messages = conv.read().unwrap().clone();
            messages.push(ChatMessage { role: ChatRole::User, content: text, name: None });
            Ok(Value::Conversation(Arc::new(std::sync::RwLock::new(messages))))
        }
        (Value::Conversation(conv), Value::Agent(agent)) => {
            let messages = conv.read().unwrap().clone();
            let updated = run_agent_blocking(&agent, messages, ctx)?;
            Ok(Value::Conversation(Arc::new(std::sync::RwLock::new(updated))))
        }
        (Value::Conversation(_), Value::Acp(_)) => {
            Err(RuntimeError::new("cannot pipe a conversation into an ACP agent; use a string prompt"))
        }
        (Value::String(text), Value::Acp(config)) => {
            let handle = block_on_current(ctx.acp.prompt_new_session(&config.name, &text))?;
            Ok(Value::AcpSession(handle))
        }
        (Value::AcpSession(session), Value::String(text)) => {
            block_on_current(ctx.acp.prompt_existing_session(&session, &text))?;
            Ok(Value::AcpSession(session))
        }
        (Value::AcpSession(_), Value::Agent(_)) => {
            Err(RuntimeError::new("an ACP session cannot be handed off to an agent"))
        }
        (Value::AcpSession(session), Value::Acp(config)) => {
            if session.agent_name() == config.name {
                Err(RuntimeError::new(format!("session is already bound to this agent '{}'", config.name)))
            } else {
                Err(RuntimeError::new(format!(
                    "session is bound to agent '{}', not '{}'",
                    session.agent_name(),
                    config.name
                )))
            }
        }
        (lhs, rhs) => Err(RuntimeError::new(format!(
            "cannot pipe a {} into a {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn run_agent_blocking(
    agent: &crate::value::AgentValue,
    conversation: Vec<ChatMessage>,
    ctx: &PipeContext,
) -> Result<Vec<ChatMessage>, RuntimeError> {
    block_on_current(agent_loop::run_agent_loop(
        agent,
        conversation,
        &ctx.providers,
        &ctx.events,
        &ctx.invoke,
        AgentLoopOptions::default(),
    ))
}

/// Bridges an async collaborator call onto the current (synchronous)
/// evaluator thread, mirroring the teacher's own
/// `task::block_in_place(|| self.list_tools_sync())` pattern.
fn block_on_current<F: std::future::Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| Handle::current().block_on(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_ctx() -> PipeContext {
        PipeContext {
            providers: Arc::new(ProviderRegistry::new()),
            events: Arc::new(EventBus::new()),
            acp: Arc::new(AcpManager::new()),
            invoke: Arc::new(|_h, _a| Ok(Value::Null)),
        }
    }

    #[test]
    fn string_into_conversation_appends_a_user_message() {
        let ctx = noop_ctx();
        let result = eval_pipe(
            Value::String("hello".into()),
            Value::Conversation(Arc::new(std::sync::RwLock::new(vec![]))),
            &ctx,
        )
        .unwrap();
        let Value::Conversation(conv) = result else { panic!("expected conversation") };
        let messages = conv.read().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "hello");
    }

    #[test]
    fn conversation_into_acp_is_rejected() {
        let ctx = noop_ctx();
        let config = Arc::new(crate::value::AcpConfig {
            name: "a".into(),
            command: "echo".into(),
            args: vec![],
            env: vec![],
            cwd: None,
        });
        let err = eval_pipe(
            Value::Conversation(Arc::new(std::sync::RwLock::new(vec![]))),
            Value::Acp(config),
            &ctx,
        )
        .unwrap_err();
        assert!(err.message.contains("use a string prompt"));
    }

    #[test]
    fn unenumerated_pairs_fail_with_a_generic_type_pair_error() {
        let ctx = noop_ctx();
        let err = eval_pipe(Value::Number(1.0), Value::Bool(true), &ctx).unwrap_err();
        assert!(err.message.contains("cannot pipe a number into a boolean"));
    }
}

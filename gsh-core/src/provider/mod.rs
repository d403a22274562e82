//! Provider registry and chat abstraction (§4.5 "Provider registry & chat
//! abstraction").
//!
//! A [`Provider`] is the thing a `model` declaration resolves its
//! `provider` config field to at declaration time; unknown providers fail
//! fast rather than at first use. Mirrors the shape of an `LlmClient`: a
//! single-call `chat` plus a `streaming_chat` that emits chunks through a
//! callback as they arrive.

mod openai;

pub use openai::OpenAiCompatibleProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::value::ObjectRef;

/// One message in a chat conversation (also the element type backing
/// `Value::Conversation`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// A tool schema offered to the model, in the shape providers expect to
/// forward more or less verbatim (JSON Schema `parameters`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Resolved model configuration a request is made against: `apiKey`,
/// `baseURL`, `model` string, optional `temperature` / `maxTokens`, and any
/// extra `headers` (§4.5).
#[derive(Clone, Debug)]
pub struct ResolvedModelConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub headers: Vec<(String, String)>,
}

impl ResolvedModelConfig {
    /// Reads the well-known fields out of a model's config object, applying
    /// the field-name conventions §4.5 names. Does not fail on missing
    /// optional fields; `chat`/`streaming_chat` validate `api_key` since the
    /// requirement is provider-specific (the OpenAI-compatible provider
    /// requires it; others might not).
    pub fn from_object(config: &ObjectRef) -> Self {
        let map = config.read().unwrap();
        let get_str = |key: &str| -> Option<String> {
            map.get(key).and_then(|p| match &p.value {
                crate::value::Value::String(s) => Some(s.clone()),
                _ => None,
            })
        };
        let get_num = |key: &str| -> Option<f64> {
            map.get(key).and_then(|p| match &p.value {
                crate::value::Value::Number(n) => Some(*n),
                _ => None,
            })
        };
        let headers = map
            .get("headers")
            .and_then(|p| match &p.value {
                crate::value::Value::Object(obj) => {
                    let obj = obj.read().unwrap();
                    Some(
                        obj.iter()
                            .filter_map(|(k, v)| match &v.value {
                                crate::value::Value::String(s) => Some((k.clone(), s.clone())),
                                _ => None,
                            })
                            .collect(),
                    )
                }
                _ => None,
            })
            .unwrap_or_default();
        ResolvedModelConfig {
            api_key: get_str("apiKey"),
            base_url: get_str("baseURL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: get_str("model").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: get_num("temperature"),
            max_tokens: get_num("maxTokens").map(|n| n as u32),
            headers,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: ResolvedModelConfig,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
}

#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: Option<TokenUsage>,
    pub tool_calls: Vec<ToolCall>,
}

/// One piece of a streaming response, forwarded to the caller's callback as
/// it arrives from the wire.
#[derive(Clone, Debug)]
pub struct ChatChunk {
    pub delta: String,
}

/// A pluggable LLM backend (§4.5). Implementations are registered by name
/// in a [`ProviderRegistry`].
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RuntimeError>;

    /// Streams chunks through `chunk_tx` as they arrive, returning the
    /// assembled final response once the stream ends. Implementations that
    /// can't stream natively may fall back to `chat` and send the full
    /// content as a single chunk.
    async fn streaming_chat(
        &self,
        request: &ChatRequest,
        chunk_tx: Option<mpsc::Sender<ChatChunk>>,
    ) -> Result<ChatResponse, RuntimeError> {
        let response = self.chat(request).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx
                    .send(ChatChunk {
                        delta: response.content.clone(),
                    })
                    .await;
            }
        }
        Ok(response)
    }
}

/// Maps provider name -> implementation. A `model` declaration resolves its
/// `provider` string at declaration time; unknown providers fail fast
/// rather than surfacing the failure at first chat call.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            providers: HashMap::new(),
        }
    }

    /// A registry with the built-in OpenAI-compatible provider registered
    /// under `"openai"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiCompatibleProvider::new()));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Provider>, RuntimeError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("unknown provider '{}'", name)))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider;

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, RuntimeError> {
            Ok(ChatResponse {
                content: "hi".to_string(),
                finish_reason: "stop".to_string(),
                usage: None,
                tool_calls: vec![],
            })
        }
    }

    #[test]
    fn unknown_provider_fails_fast() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("nonexistent").unwrap_err();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[test]
    fn with_defaults_registers_openai() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.resolve("openai").is_ok());
    }

    #[tokio::test]
    async fn default_streaming_chat_falls_back_to_single_chunk() {
        let provider = StubProvider;
        let request = ChatRequest {
            model: ResolvedModelConfig {
                api_key: None,
                base_url: "https://example.invalid".to_string(),
                model: "stub-model".to_string(),
                temperature: None,
                max_tokens: None,
                headers: vec![],
            },
            messages: vec![],
            tools: vec![],
        };
        let (tx, mut rx) = mpsc::channel(2);
        let response = provider.streaming_chat(&request, Some(tx)).await.unwrap();
        assert_eq!(response.content, "hi");
        let chunk = rx.recv().await.expect("one chunk");
        assert_eq!(chunk.delta, "hi");
    }
}

//! OpenAI-compatible chat completions provider (§4.5, §6 "Provider wire
//! format").
//!
//! POSTs `<baseURL>/chat/completions` with `Authorization: Bearer <apiKey>`.
//! Streaming reads `text/event-stream`: each `data: {...}` frame holds a
//! chunk with `choices[0].delta.content`; `data: [DONE]` ends the stream.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::RuntimeError;

use super::{ChatChunk, ChatRequest, ChatResponse, Provider, ToolCall, TokenUsage};

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new() -> Self {
        OpenAiCompatibleProvider {
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                let mut obj = json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                });
                if let Some(name) = &m.name {
                    obj["name"] = json!(name);
                }
                obj
            })
            .collect();

        let mut body = json!({
            "model": request.model.model,
            "messages": messages,
        });
        let obj = body.as_object_mut().unwrap();
        if let Some(t) = request.model.temperature {
            obj.insert("temperature".to_string(), json!(t));
        }
        if let Some(m) = request.model.max_tokens {
            obj.insert("max_tokens".to_string(), json!(m));
        }
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".to_string(), json!(tools));
        }
        if stream {
            obj.insert("stream".to_string(), json!(true));
        }
        body
    }

    fn request_builder(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, RuntimeError> {
        let api_key = request
            .model
            .api_key
            .as_ref()
            .ok_or_else(|| RuntimeError::new("model config requires 'apiKey'"))?;
        let url = format!("{}/chat/completions", request.model.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");
        for (key, value) in &request.model.headers {
            builder = builder.header(key, value);
        }
        Ok(builder)
    }

    fn parse_response(value: &serde_json::Value) -> Result<ChatResponse, RuntimeError> {
        let choices = value
            .get("choices")
            .and_then(|c| c.as_array())
            .ok_or_else(|| RuntimeError::new("no choices in response"))?;
        let choice = choices
            .first()
            .ok_or_else(|| RuntimeError::new("no choices in response"))?;
        let message = choice.get("message").cloned().unwrap_or(serde_json::Value::Null);
        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();
        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or("stop")
            .to_string();
        let tool_calls = message
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let function = tc.get("function")?;
                        let name = function.get("name")?.as_str()?.to_string();
                        let arguments_str = function.get("arguments").and_then(|a| a.as_str()).unwrap_or("{}");
                        let arguments = serde_json::from_str(arguments_str).unwrap_or(serde_json::Value::Null);
                        Some(ToolCall { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let usage = value.get("usage").map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        });
        Ok(ChatResponse {
            content,
            finish_reason,
            usage,
            tool_calls,
        })
    }
}

impl Default for OpenAiCompatibleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RuntimeError> {
        let body = self.build_body(request, false);
        let builder = self.request_builder(request)?;
        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| RuntimeError::new(format!("provider request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RuntimeError::new(format!(
                "provider returned status {}: {}",
                status.as_u16(),
                body_text
            )));
        }
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RuntimeError::new(format!("invalid provider response: {}", e)))?;
        Self::parse_response(&value)
    }

    async fn streaming_chat(
        &self,
        request: &ChatRequest,
        chunk_tx: Option<mpsc::Sender<ChatChunk>>,
    ) -> Result<ChatResponse, RuntimeError> {
        let body = self.build_body(request, true);
        let builder = self.request_builder(request)?;
        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| RuntimeError::new(format!("provider request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RuntimeError::new(format!(
                "provider returned status {}: {}",
                status.as_u16(),
                body_text
            )));
        }

        let mut content = String::new();
        let mut usage = None;
        let mut finish_reason = "stop".to_string();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(next) = stream.next().await {
            let bytes = next.map_err(|e| RuntimeError::new(format!("stream read failed: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);
                let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    continue;
                }
                let chunk: serde_json::Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(choice) = chunk.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first()) {
                    if let Some(delta) = choice.get("delta").and_then(|d| d.get("content")).and_then(|c| c.as_str()) {
                        if !delta.is_empty() {
                            content.push_str(delta);
                            if let Some(tx) = &chunk_tx {
                                let _ = tx
                                    .send(ChatChunk {
                                        delta: delta.to_string(),
                                    })
                                    .await;
                            }
                        }
                    }
                    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
                        finish_reason = reason.to_string();
                    }
                }
                if let Some(u) = chunk.get("usage") {
                    usage = Some(TokenUsage {
                        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    });
                }
            }
        }

        Ok(ChatResponse {
            content,
            finish_reason,
            usage,
            tool_calls: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatMessage, ChatRole, ResolvedModelConfig};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_for(base_url: String) -> ChatRequest {
        ChatRequest {
            model: ResolvedModelConfig {
                api_key: Some("sk-test".to_string()),
                base_url,
                model: "gpt-4o-mini".to_string(),
                temperature: None,
                max_tokens: None,
                headers: vec![],
            },
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "hello".to_string(),
                name: None,
            }],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn missing_api_key_fails_fast() {
        let provider = OpenAiCompatibleProvider::new();
        let mut request = request_for("https://example.invalid".to_string());
        request.model.api_key = None;
        let err = provider.chat(&request).await.unwrap_err();
        assert!(err.to_string().contains("requires 'apiKey'"));
    }

    #[tokio::test]
    async fn chat_parses_a_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "hi there"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new();
        let request = request_for(server.uri());
        let response = provider.chat(&request).await.unwrap();
        assert_eq!(response.content, "hi there");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn non_2xx_status_fails_with_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new();
        let request = request_for(server.uri());
        let err = provider.chat(&request).await.unwrap_err();
        assert!(err.to_string().contains("returned status 500"));
    }

    #[tokio::test]
    async fn empty_choices_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new();
        let request = request_for(server.uri());
        let err = provider.chat(&request).await.unwrap_err();
        assert!(err.to_string().contains("no choices in response"));
    }
}

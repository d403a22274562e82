//! MCP manager (§4.8 "MCP manager", §6 "MCP protocol").
//!
//! For each `mcp NAME { command, args, env?, cwd? }` declaration the manager
//! spawns the command, performs the MCP handshake, calls `tools/list`, and
//! binds an MCP proxy [`Value`](crate::value::Value) to NAME. Member access on
//! the proxy yields a per-tool call value; invoking it issues `tools/call` and
//! converts the result content into a script value.

mod session;

pub use session::{McpSession, McpSessionError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::json;
use tokio::task;

use crate::error::RuntimeError;
use crate::value::{value_from_json, value_to_json, Value};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
}

impl McpServerConfig {
    /// Validates a raw config object against §4.8: `command` required
    /// string, `args` optional array of strings, `env` optional object of
    /// string -> string, `cwd` optional string, and no other keys.
    pub fn from_object(config: &crate::value::ObjectRef) -> Result<Self, RuntimeError> {
        let map = config.read().unwrap();
        for key in map.keys() {
            if !matches!(key.as_str(), "command" | "args" | "env" | "cwd") {
                return Err(RuntimeError::new(format!("unknown MCP config field '{}'", key)));
            }
        }
        let command = match map.get("command").map(|p| &p.value) {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(RuntimeError::new("MCP config requires a string 'command'")),
        };
        let args = match map.get("args").map(|p| &p.value) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .read()
                .unwrap()
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(RuntimeError::new(format!(
                        "MCP config 'args' must be strings, found {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(RuntimeError::new("MCP config 'args' must be an array")),
        };
        let env = match map.get("env").map(|p| &p.value) {
            None => Vec::new(),
            Some(Value::Object(obj)) => obj
                .read()
                .unwrap()
                .iter()
                .map(|(k, p)| match &p.value {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    other => Err(RuntimeError::new(format!(
                        "MCP config 'env' values must be strings, found {}",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(RuntimeError::new("MCP config 'env' must be an object")),
        };
        let cwd = match map.get("cwd").map(|p| &p.value) {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(RuntimeError::new("MCP config 'cwd' must be a string")),
        };
        Ok(McpServerConfig { command, args, env, cwd })
    }
}

#[derive(Clone, Debug)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

struct McpServer {
    session: Mutex<McpSession>,
    tools: Vec<McpToolInfo>,
}

/// Owns every spawned MCP server process for one interpreter instance.
pub struct McpManager {
    servers: RwLock<HashMap<String, Arc<McpServer>>>,
}

impl McpManager {
    pub fn new() -> Self {
        McpManager {
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Spawns `name`'s server and performs the handshake + `tools/list`.
    /// Duplicate server names fail (§4.8).
    pub async fn declare(&self, name: String, config: McpServerConfig) -> Result<(), RuntimeError> {
        if self.servers.read().unwrap().contains_key(&name) {
            return Err(RuntimeError::new(format!("duplicate MCP server name '{}'", name)));
        }
        let server = task::spawn_blocking(move || -> Result<(McpSession, Vec<McpToolInfo>), McpSessionError> {
            let mut session = McpSession::new(config.command.clone(), config.args.clone(), config.env.clone(), config.cwd.clone())
                .map_err(|e| McpSessionError::Initialize(format!("failed to spawn '{}': {}", config.command, e)))?;
            let result = session.call("gsh-tools-list", "tools/list", json!({}), CALL_TIMEOUT)?;
            let tools = parse_tools_list(result)?;
            Ok((session, tools))
        })
        .await
        .map_err(|e| RuntimeError::new(format!("MCP server task panicked: {}", e)))?
        .map_err(|e| RuntimeError::new(e.to_string()))?;

        let (session, tools) = server;
        self.servers.write().unwrap().insert(
            name,
            Arc::new(McpServer {
                session: Mutex::new(session),
                tools,
            }),
        );
        Ok(())
    }

    pub fn tools(&self, server_name: &str) -> Result<Vec<McpToolInfo>, RuntimeError> {
        self.servers
            .read()
            .unwrap()
            .get(server_name)
            .map(|s| s.tools.clone())
            .ok_or_else(|| RuntimeError::new(format!("no such MCP server '{}'", server_name)))
    }

    /// Issues `tools/call` for `tool_name` on `server_name` with `arguments`
    /// (a script object), converting the result content into a script value.
    pub async fn call_tool(&self, server_name: &str, tool_name: &str, arguments: Value) -> Result<Value, RuntimeError> {
        let server = self
            .servers
            .read()
            .unwrap()
            .get(server_name)
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("no such MCP server '{}'", server_name)))?;
        let args_json = value_to_json(&arguments);
        let tool_name = tool_name.to_string();
        let result = task::spawn_blocking(move || -> Result<serde_json::Value, McpSessionError> {
            let mut session = server.session.lock().unwrap();
            let params = json!({ "name": tool_name, "arguments": args_json });
            let id = format!("gsh-call-{}", tool_name);
            let result = session.call(&id, "tools/call", params, CALL_TIMEOUT)?;
            parse_call_result(result)
        })
        .await
        .map_err(|e| RuntimeError::new(format!("MCP call task panicked: {}", e)))?
        .map_err(|e| RuntimeError::new(e.to_string()))?;

        Ok(value_from_json(&result))
    }

    /// Terminates every spawned subprocess (interpreter `Close`).
    pub fn shutdown(&self) {
        self.servers.write().unwrap().clear();
    }
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_tools_list(result: mcp_core::ResultMessage) -> Result<Vec<McpToolInfo>, McpSessionError> {
    if let Some(err) = result.error {
        return Err(McpSessionError::JsonRpc(err.message));
    }
    let tools = result
        .result
        .and_then(|r| r.get("tools").cloned())
        .and_then(|t| t.as_array().cloned())
        .ok_or_else(|| McpSessionError::JsonRpc("no tools in response".into()))?;
    Ok(tools
        .iter()
        .map(|t| McpToolInfo {
            name: t.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string(),
            description: t.get("description").and_then(|d| d.as_str()).map(String::from),
            input_schema: t.get("inputSchema").cloned().unwrap_or(json!({})),
        })
        .collect())
}

/// Extracts `{ type: "text", text }` parts from a `tools/call` result,
/// concatenating them (§6 "MCP protocol": "text parts are concatenated"),
/// and returns the result as a JSON string value wrapping the raw text, or
/// the structured JSON content when the server returned `structuredContent`.
fn parse_call_result(result: mcp_core::ResultMessage) -> Result<serde_json::Value, McpSessionError> {
    if let Some(err) = result.error {
        return Err(McpSessionError::JsonRpc(err.message));
    }
    let value = result
        .result
        .ok_or_else(|| McpSessionError::JsonRpc("no result in tools/call response".into()))?;
    if value.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
        let message = value
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|b| b.get("text").and_then(|t| t.as_str()))
            .unwrap_or("tool returned error")
            .to_string();
        return Err(McpSessionError::JsonRpc(message));
    }
    if let Some(structured) = value.get("structuredContent") {
        return Ok(structured.clone());
    }
    let text = value
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    Ok(serde_json::Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ObjectMap, Property};

    #[test]
    fn config_rejects_unknown_fields() {
        let mut map = ObjectMap::new();
        map.insert("command".into(), Property::new(Value::String("x".into())));
        map.insert("bogus".into(), Property::new(Value::Bool(true)));
        let config: crate::value::ObjectRef = Arc::new(std::sync::RwLock::new(map));
        let err = McpServerConfig::from_object(&config).unwrap_err();
        assert!(err.to_string().contains("unknown MCP config field"));
    }

    #[test]
    fn config_requires_string_command() {
        let map = ObjectMap::new();
        let config: crate::value::ObjectRef = Arc::new(std::sync::RwLock::new(map));
        let err = McpServerConfig::from_object(&config).unwrap_err();
        assert!(err.to_string().contains("requires a string 'command'"));
    }

    #[test]
    fn parse_call_result_joins_text_blocks() {
        let result = mcp_core::ResultMessage::success(
            "1",
            json!({"content": [{"type":"text","text":"a"}, {"type":"text","text":"b"}]}),
        );
        let value = parse_call_result(result).unwrap();
        assert_eq!(value, json!("a\nb"));
    }

    #[test]
    fn parse_call_result_surfaces_is_error() {
        let result = mcp_core::ResultMessage::success(
            "1",
            json!({"isError": true, "content": [{"type":"text","text":"boom"}]}),
        );
        let err = parse_call_result(result).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}

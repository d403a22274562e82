//! One ACP agent subprocess: JSON-RPC 2.0 framed over stdio, newline
//! delimited (§6 "ACP protocol"). Unlike the MCP manager's dedicated-thread
//! transport, this reads/writes on the tokio runtime directly: a background
//! task owns the child's stdout and demultiplexes responses (by JSON-RPC id,
//! via a `oneshot` per in-flight request) from `session/update` notifications
//! (forwarded to a per-session callback).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::RuntimeError;

/// One streamed ACP `session/update` notification, reduced to the fields
/// the manager cares about (§4.9 table).
#[derive(Clone, Debug)]
pub enum SessionUpdate {
    AgentMessageChunk { content: String },
    AgentThoughtChunk { content: String },
    ToolCallPending { id: String, kind: String, arguments: Value },
    ToolCallStart { id: String, kind: String, arguments: Value },
    ToolCallEnd { id: String, kind: String, status: String, result: Value },
    PromptStop { error: Option<String> },
}

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;
type UpdateSink = Arc<dyn Fn(&str, SessionUpdate) + Send + Sync>;

/// A spawned ACP agent process with one live JSON-RPC connection.
pub struct AcpProcess {
    stdin: Mutex<ChildStdin>,
    pending: PendingTable,
    next_id: AtomicU64,
    _child: Mutex<Child>,
}

impl AcpProcess {
    /// Spawns `command` and starts the background reader task. `on_update`
    /// is invoked (with the owning session id) for every `session/update`
    /// notification, from the reader task.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(String, String)],
        cwd: Option<&str>,
        on_update: UpdateSink,
    ) -> Result<Arc<Self>, RuntimeError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::new(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::new("failed to capture ACP agent stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::new("failed to capture ACP agent stdout"))?;

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let Ok(message) = serde_json::from_str::<Value>(&line) else {
                            continue;
                        };
                        dispatch_incoming(message, &reader_pending, &on_update).await;
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        Ok(Arc::new(AcpProcess {
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            _child: Mutex::new(child),
        }))
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let envelope = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.write_line(&envelope).await?;

        rx.await
            .map_err(|_| RuntimeError::new("ACP agent closed the connection before replying"))
    }

    async fn write_line(&self, message: &Value) -> Result<(), RuntimeError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| RuntimeError::new(format!("failed to encode ACP message: {}", e)))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RuntimeError::new(format!("failed to write to ACP agent: {}", e)))
    }
}

async fn dispatch_incoming(message: Value, pending: &PendingTable, on_update: &UpdateSink) {
    if let Some(id) = message.get("id").and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string()))) {
        if message.get("method").is_none() {
            // A response to one of our requests.
            if let Some(tx) = pending.lock().await.remove(&id) {
                let payload = message.get("result").cloned().unwrap_or(Value::Null);
                let _ = tx.send(payload);
            }
            return;
        }
    }
    if message.get("method").and_then(|m| m.as_str()) == Some("session/update") {
        let Some(params) = message.get("params") else { return };
        let session_id = params
            .get("sessionId")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string();
        if let Some(update) = parse_session_update(params) {
            on_update(&session_id, update);
        }
    }
}

fn parse_session_update(params: &Value) -> Option<SessionUpdate> {
    let update = params.get("update")?;
    let kind = update.get("sessionUpdate").and_then(|v| v.as_str())?;
    match kind {
        "agent_message_chunk" => Some(SessionUpdate::AgentMessageChunk {
            content: text_of(update),
        }),
        "agent_thought_chunk" => Some(SessionUpdate::AgentThoughtChunk {
            content: text_of(update),
        }),
        "tool_call" => Some(SessionUpdate::ToolCallPending {
            id: update.get("toolCallId").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            kind: update.get("kind").and_then(|v| v.as_str()).unwrap_or("other").to_string(),
            arguments: update.get("rawInput").cloned().unwrap_or(Value::Null),
        }),
        "tool_call_update" => {
            let status = update.get("status").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let id = update.get("toolCallId").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let kind = update.get("kind").and_then(|v| v.as_str()).unwrap_or("other").to_string();
            match status.as_str() {
                "in_progress" => Some(SessionUpdate::ToolCallStart { id, kind, arguments: update.get("rawInput").cloned().unwrap_or(Value::Null) }),
                "completed" | "failed" => Some(SessionUpdate::ToolCallEnd {
                    id,
                    kind,
                    status,
                    result: update.get("rawOutput").cloned().unwrap_or(Value::Null),
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

fn text_of(update: &Value) -> String {
    update
        .get("content")
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Used for the synthetic terminal notification produced when a `session/prompt`
/// request errors or completes; the manager emits `PromptStop` explicitly
/// around the request rather than waiting on a notification for it, since
/// `session/prompt`'s own response already carries the stop reason.
pub fn prompt_stop(error: Option<String>) -> SessionUpdate {
    SessionUpdate::PromptStop { error }
}

pub type UpdateCallback = mpsc::UnboundedSender<SessionUpdate>;

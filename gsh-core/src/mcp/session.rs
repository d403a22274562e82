//! Stdio transport for one MCP server process (§4.8, §6 "MCP protocol").
//!
//! JSON-RPC 2.0 framed over the child's stdin/stdout. A background thread (set
//! up by [`mcp_client::stdio::StdioClientTransport`]) pushes every inbound
//! message onto a `std::sync::mpsc` channel; [`McpSession::wait_for_result`]
//! blocks on that channel with a timeout. Blocking by design: the manager
//! drives each session from inside `tokio::task::spawn_blocking`.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use mcp_client::stdio::{
    JsonRpcMessage, StdioClientTransport, StdioClientTransportError, StdioServerParameters,
    StdioStream,
};
use mcp_core::{MessageId, NotificationMessage, RequestMessage, ResultMessage};
use serde_json::{json, Value};

const PROTOCOL_VERSION: &str = "2025-11-25";
const INITIALIZE_REQUEST_ID: &str = "gsh-mcp-initialize";

pub struct McpSession {
    transport: StdioClientTransport,
    receiver: mpsc::Receiver<JsonRpcMessage>,
}

impl McpSession {
    /// Spawns `command` with `args`/`env`/`cwd` and runs the MCP `initialize`
    /// handshake to completion. `cwd` is applied before spawn; the child
    /// inherits only what `env` and the parent process set.
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: Vec<(String, String)>,
        cwd: Option<String>,
    ) -> Result<Self, McpSessionError> {
        let (tx, rx) = mpsc::channel();

        let mut params = StdioServerParameters::new(command)
            .args(args)
            .stderr(StdioStream::Null);
        if !env.is_empty() {
            params = params.env(env);
        }
        if let Some(dir) = cwd {
            params = params.cwd(dir);
        }

        let mut transport = StdioClientTransport::new(params);
        transport.on_message(move |msg| {
            let _ = tx.send(msg);
        });
        transport.on_error(|e| {
            tracing::warn!(error = %e, "mcp transport error");
        });

        transport.start().map_err(McpSessionError::Transport)?;

        let mut session = Self {
            transport,
            receiver: rx,
        };
        session.initialize()?;
        Ok(session)
    }

    fn initialize(&mut self) -> Result<(), McpSessionError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": "gsh", "version": env!("CARGO_PKG_VERSION") }
        });
        self.send_request(INITIALIZE_REQUEST_ID, "initialize", params)?;

        match self.wait_for_result(INITIALIZE_REQUEST_ID, Duration::from_secs(20))? {
            Some(result) => {
                if let Some(err) = result.error {
                    return Err(McpSessionError::Initialize(err.message));
                }
                let notification = JsonRpcMessage::Notification(NotificationMessage::new(
                    "notifications/initialized",
                    Some(json!({})),
                ));
                self.transport
                    .send(&notification)
                    .map_err(McpSessionError::Transport)?;
                Ok(())
            }
            None => Err(McpSessionError::Initialize("timeout waiting for initialize".into())),
        }
    }

    pub fn send_request(&mut self, id: &str, method: &str, params: Value) -> Result<(), McpSessionError> {
        let request = RequestMessage::new(id, method, params);
        self.transport
            .send(&JsonRpcMessage::Request(request))
            .map_err(McpSessionError::Transport)
    }

    /// Blocks until a result matching `request_id` arrives or `timeout`
    /// elapses. A `roots/list` request from the server is answered with an
    /// empty root list (gsh does not expose filesystem roots).
    pub fn wait_for_result(
        &mut self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Option<ResultMessage>, McpSessionError> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now()).min(Duration::from_secs(1));
            match self.receiver.recv_timeout(remaining) {
                Ok(JsonRpcMessage::Result(msg)) if message_id_matches(&msg.id, request_id) => {
                    return Ok(Some(msg));
                }
                Ok(JsonRpcMessage::Request(req)) if req.method == "roots/list" => {
                    let result = ResultMessage::success(req.id.clone(), json!({ "roots": [] }));
                    self.transport
                        .send(&JsonRpcMessage::Result(result))
                        .map_err(McpSessionError::Transport)?;
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(None)
    }

    pub fn call(&mut self, id: &str, method: &str, params: Value, timeout: Duration) -> Result<ResultMessage, McpSessionError> {
        self.send_request(id, method, params)?;
        self.wait_for_result(id, timeout)?
            .ok_or_else(|| McpSessionError::Timeout(method.to_string()))
    }
}

fn message_id_matches(id: &MessageId, expected: &str) -> bool {
    id.as_str() == Some(expected)
}

#[derive(Debug, thiserror::Error)]
pub enum McpSessionError {
    #[error("transport: {0}")]
    Transport(#[from] StdioClientTransportError),
    #[error("{0}")]
    Initialize(String),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("{0}")]
    JsonRpc(String),
}

//! MCP Protocol Handler
//!
//! Implements JSON-RPC 2.0 over stdio for Model Context Protocol.
//! Reference: https://modelcontextprotocol.io/specification
//!
//! Every outgoing line (responses and progress notifications) goes through a
//! single writer task, so concurrent tool calls never interleave bytes.
//! `tools/call` runs on its own task; everything else is answered inline.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::instagram::{ProgressNotification, ProgressReporter, ProgressSink};
use crate::tools::ToolRegistry;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Notification (server -> client)
#[derive(Debug, Clone, Serialize)]
pub struct McpNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

impl McpResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// MCP Error Codes
pub mod error_codes {
    // JSON-RPC standard errors
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
}

/// Handle for queuing lines to the writer task
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbound {
    /// Queue a message. A closed transport drops it silently.
    pub fn send<T: Serialize>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(line) => {
                debug!("→ {}", line);
                if self.tx.send(line).is_err() {
                    trace!("transport closed, message dropped");
                }
            }
            Err(e) => error!("Failed to encode outgoing message: {}", e),
        }
    }
}

/// Progress sink emitting `notifications/progress`
pub struct ProgressNotifier {
    outbound: Outbound,
    progress_token: Option<serde_json::Value>,
}

impl ProgressNotifier {
    pub fn new(outbound: Outbound, progress_token: Option<serde_json::Value>) -> Self {
        Self {
            outbound,
            progress_token,
        }
    }
}

impl ProgressSink for ProgressNotifier {
    fn emit(&self, notification: ProgressNotification) {
        let mut params = match serde_json::to_value(&notification) {
            Ok(params) => params,
            Err(e) => {
                error!("Failed to encode progress: {}", e);
                return;
            }
        };
        if let (Some(token), Some(obj)) = (&self.progress_token, params.as_object_mut()) {
            obj.insert("progressToken".to_string(), token.clone());
        }

        self.outbound.send(&McpNotification {
            jsonrpc: "2.0".to_string(),
            method: "notifications/progress".to_string(),
            params,
        });
    }
}

/// Cancellation handles of in-flight tool calls, keyed by request id
type Pending = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Registration in [`Pending`], removed when the call task ends or is aborted
struct PendingCall {
    pending: Pending,
    key: Option<String>,
}

impl PendingCall {
    fn register(pending: &Pending, id: Option<&serde_json::Value>, token: &CancellationToken) -> Self {
        let key = id.map(|v| v.to_string());
        if let Some(key) = &key {
            pending.lock().insert(key.clone(), token.clone());
        }
        Self {
            pending: pending.clone(),
            key,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(key) = &self.key {
            self.pending.lock().remove(key);
        }
    }
}

/// MCP Server
pub struct McpServer {
    tools: Arc<ToolRegistry>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
    pending: Pending,
}

impl McpServer {
    /// Create new MCP server
    pub fn new(tools: ToolRegistry, shutdown_grace: Duration) -> Self {
        Self {
            tools: Arc::new(tools),
            shutdown: CancellationToken::new(),
            shutdown_grace,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the MCP server (stdio mode)
    pub async fn run(&self) -> anyhow::Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one client until EOF or shutdown, then release resources and close the transport
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Outbound { tx };
        let writer_task = tokio::spawn(write_loop(writer, rx));

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut calls: JoinSet<()> = JoinSet::new();

        info!("MCP server ready, waiting for requests...");

        let read_result = loop {
            line.clear();
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                read = reader.read_line(&mut line) => Some(read),
            };

            let bytes_read = match read {
                None => {
                    info!("Shutdown requested, no longer reading requests");
                    break Ok(());
                }
                Some(Ok(n)) => n,
                Some(Err(e)) => break Err(e),
            };

            if bytes_read == 0 {
                info!("Client disconnected (EOF)");
                break Ok(());
            }

            while let Some(done) = calls.try_join_next() {
                if let Err(e) = done {
                    error!("Tool call task failed: {}", e);
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!("← {}", trimmed);

            match serde_json::from_str::<McpRequest>(trimmed) {
                Ok(request) if request.jsonrpc != "2.0" => {
                    warn!("Unsupported jsonrpc version: {}", request.jsonrpc);
                    outbound.send(&McpResponse::error(
                        request.id,
                        error_codes::INVALID_REQUEST,
                        "Only JSON-RPC 2.0 is supported",
                    ));
                }
                Ok(request) if request.method == "tools/call" => {
                    self.spawn_tools_call(&mut calls, &outbound, request);
                }
                Ok(request) => {
                    if let Some(response) = self.handle_request(request) {
                        outbound.send(&response);
                    }
                }
                Err(e) => {
                    error!("Parse error: {}", e);
                    outbound.send(&McpResponse::error(
                        None,
                        error_codes::PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ));
                }
            }
        };

        // In-flight fetches stop at their next round boundary
        self.shutdown.cancel();
        self.drain(&mut calls).await;

        self.tools.shutdown().await;

        drop(outbound);
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Transport close failed: {}", e),
            Err(e) => error!("Writer task failed: {}", e),
        }

        info!("MCP server stopped");
        read_result.map_err(Into::into)
    }

    /// Wait for in-flight tool calls, aborting stragglers after the grace period
    async fn drain(&self, calls: &mut JoinSet<()>) {
        if calls.is_empty() {
            return;
        }
        info!(in_flight = calls.len(), "Waiting for in-flight tool calls");

        let finished = tokio::time::timeout(self.shutdown_grace, async {
            while calls.join_next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = calls.len(),
                grace_secs = self.shutdown_grace.as_secs(),
                "Aborting tool calls still running after grace period"
            );
            calls.abort_all();
            while calls.join_next().await.is_some() {}
        }
    }

    /// Handle a single non-tool-call MCP request. None for notifications.
    fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        // Notifications (no id) never get a response
        if request.id.is_none() {
            match request.method.as_str() {
                "notifications/initialized" | "initialized" => debug!("Received initialized notification"),
                "notifications/cancelled" => self.handle_cancelled(&request.params),
                method => debug!("Ignoring notification: {}", method),
            }
            return None;
        }

        let response = match request.method.as_str() {
            // Lifecycle
            "initialize" => self.handle_initialize(request.id),
            "shutdown" => {
                info!("Shutdown requested");
                McpResponse::success(request.id, serde_json::json!({}))
            }

            // Tools
            "tools/list" => self.handle_tools_list(request.id),

            // Ping
            "ping" => McpResponse::success(request.id, serde_json::json!({})),

            // Unknown
            method => {
                warn!("Unknown method: {}", method);
                McpResponse::error(
                    request.id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                )
            }
        };

        Some(response)
    }

    /// Handle initialize
    fn handle_initialize(&self, id: Option<serde_json::Value>) -> McpResponse {
        McpResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": "instagram-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    /// Handle tools/list
    fn handle_tools_list(&self, id: Option<serde_json::Value>) -> McpResponse {
        let tools = self.tools.list_definitions();
        McpResponse::success(id, serde_json::json!({ "tools": tools }))
    }

    /// Handle notifications/cancelled for a running tool call
    fn handle_cancelled(&self, params: &serde_json::Value) {
        let Some(request_id) = params.get("requestId") else {
            return;
        };
        if let Some(token) = self.pending.lock().get(&request_id.to_string()) {
            info!(request_id = %request_id, "Client cancelled tool call");
            token.cancel();
        }
    }

    /// Handle tools/call on its own task
    fn spawn_tools_call(&self, calls: &mut JoinSet<()>, outbound: &Outbound, request: McpRequest) {
        let id = request.id;
        let params = request.params;

        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => {
                outbound.send(&McpResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    "Missing 'name' parameter",
                ));
                return;
            }
        };

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        let progress_token = params
            .get("_meta")
            .and_then(|m| m.get("progressToken"))
            .cloned();

        let cancel = self.shutdown.child_token();
        let registration = PendingCall::register(&self.pending, id.as_ref(), &cancel);

        let tools = self.tools.clone();
        let outbound = outbound.clone();

        calls.spawn(async move {
            let _registration = registration;
            let reporter = ProgressReporter::new(Arc::new(ProgressNotifier::new(
                outbound.clone(),
                progress_token,
            )));

            let response = match tools.call(&name, arguments, reporter, cancel).await {
                Ok(output) => McpResponse::success(id, output.into_result()),
                Err(e) => {
                    warn!(tool = %name, "Tool call rejected: {}", e);
                    McpResponse::error(id, e.code(), e.to_string())
                }
            };

            outbound.send(&response);
        });
    }
}

/// Write queued lines until every sender is gone, then close the stream
async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

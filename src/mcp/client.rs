use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    McpToolDefinition, ServerInfo, PROTOCOL_VERSION,
};
use crate::config::McpServerConfig;
use crate::error::{MathGraphError, Result};
use crate::tool::{Tool, ToolRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// Transports
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response carrying the same id.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Newline-delimited JSON-RPC over any async reader/writer pair.
pub struct StreamTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    request_id: AtomicU64,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            request_id: AtomicU64::new(1),
        }
    }

    async fn write_frame(&self, request: &JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MathGraphError::Mcp(format!("failed to write to MCP server: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| MathGraphError::Mcp(format!("failed to flush MCP request: {e}")))?;
        Ok(())
    }

    async fn read_response(reader: &mut R, expected: &Value) -> Result<JsonRpcResponse> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| MathGraphError::Mcp(format!("failed to read from MCP server: {e}")))?;
            if read == 0 {
                return Err(MathGraphError::Mcp("MCP server closed the connection".into()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(response) if &response.id == expected => return Ok(response),
                Ok(response) => {
                    debug!(id = %response.id, "skipping MCP frame for another request");
                }
                Err(err) => {
                    debug!(frame = trimmed, error = %err, "skipping non-response MCP frame");
                }
            }
        }
    }
}

#[async_trait]
impl<R, W> McpTransport for StreamTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = Value::from(self.request_id.fetch_add(1, Ordering::SeqCst));
        request.id = Some(id.clone());

        // Holding the reader across the write keeps request/response pairs in order.
        let mut reader = self.reader.lock().await;
        self.write_frame(&request).await?;
        Self::read_response(&mut reader, &id).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.write_frame(&JsonRpcRequest::new(method, params)).await
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| MathGraphError::Mcp(format!("failed to close MCP stream: {e}")))
    }
}

/// Launches an MCP server as a subprocess and talks to it over its stdio.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stream: StreamTransport<BufReader<ChildStdout>, ChildStdin>,
}

impl StdioTransport {
    pub fn spawn(command: &str, args: &[String], env: &BTreeMap<String, String>) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MathGraphError::Mcp(format!("failed to spawn MCP server `{command}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MathGraphError::Mcp("MCP server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MathGraphError::Mcp("MCP server stdout not available".into()))?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            stream: StreamTransport::new(BufReader::new(stdout), stdin),
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.stream.send(request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.stream.notify(method, params).await
    }

    async fn close(&self) -> Result<()> {
        // Closing stdin lets a well-behaved server exit on EOF.
        if let Err(err) = self.stream.close().await {
            debug!(error = %err, "MCP stdin already closed");
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let waited =
                tokio::time::timeout(std::time::Duration::from_secs(2), child.wait()).await;
            if waited.is_err() {
                child
                    .kill()
                    .await
                    .map_err(|e| MathGraphError::Mcp(format!("failed to kill MCP server: {e}")))?;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct McpClient<T: McpTransport> {
    transport: T,
    server_info: Option<ServerInfo>,
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            server_info: None,
        }
    }

    /// Perform the `initialize` handshake. Repeated calls return the cached info.
    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.server_info.is_none() {
            let request = JsonRpcRequest::new(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mathgraph",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            );
            let result = self.transport.send(request).await?.into_result("initialize")?;
            let result: InitializeResult = serde_json::from_value(result).map_err(|e| {
                MathGraphError::Mcp(format!("failed to parse initialize result: {e}"))
            })?;
            if result.protocol_version != PROTOCOL_VERSION {
                warn!(
                    server = %result.server_info.name,
                    version = %result.protocol_version,
                    "MCP server negotiated a different protocol version"
                );
            }
            self.transport
                .notify("notifications/initialized", None)
                .await?;
            debug!(server = %result.server_info.name, "MCP session initialized");
            self.server_info = Some(result.server_info);
        }

        self.server_info
            .as_ref()
            .ok_or_else(|| MathGraphError::Mcp("server info not available".into()))
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        self.initialize().await?;
        let result = self
            .transport
            .send(JsonRpcRequest::new("tools/list", None))
            .await?
            .into_result("tools/list")?;
        let result: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| MathGraphError::Mcp(format!("failed to parse tools/list result: {e}")))?;
        Ok(result.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.initialize().await?;
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        );
        let result = self
            .transport
            .send(request)
            .await?
            .into_result("tools/call")?;
        serde_json::from_value(result)
            .map_err(|e| MathGraphError::Mcp(format!("failed to parse tools/call result: {e}")))
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool integration
// ─────────────────────────────────────────────────────────────────────────────

/// Exposes the tools of one MCP server as local [`Tool`]s.
pub struct McpTools<T: McpTransport + 'static> {
    client: Arc<Mutex<McpClient<T>>>,
}

impl<T: McpTransport + 'static> McpTools<T> {
    pub fn new(client: McpClient<T>) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }

    /// List the server's tools and register a proxy for each under its remote name.
    pub async fn register_tools(&self, registry: &mut ToolRegistry) -> Result<usize> {
        let definitions = self.client.lock().await.list_tools().await?;
        let count = definitions.len();
        for definition in definitions {
            let description = definition
                .description
                .unwrap_or_else(|| format!("MCP tool: {}", definition.name));
            registry.register(McpToolProxy {
                name: definition.name,
                description,
                parameters: definition.input_schema,
                client: Arc::clone(&self.client),
            });
        }
        Ok(count)
    }

    pub async fn close(&self) -> Result<()> {
        self.client.lock().await.close().await
    }
}

struct McpToolProxy<T: McpTransport + 'static> {
    name: String,
    description: String,
    parameters: Value,
    client: Arc<Mutex<McpClient<T>>>,
}

#[async_trait]
impl<T: McpTransport + 'static> Tool for McpToolProxy<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Option<Value> {
        Some(self.parameters.clone())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let result = self.client.lock().await.call_tool(&self.name, input).await?;
        let text = result.joined_text();

        // Tool-level failures go back to the model rather than aborting the run.
        if result.is_error {
            return Ok(json!({ "error": true, "content": text }));
        }

        Ok(serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "content": text })))
    }
}

/// Every configured tool server, connected once and merged into one registry.
pub struct McpToolbox {
    registry: ToolRegistry,
    sessions: Vec<(String, McpTools<StdioTransport>)>,
}

impl McpToolbox {
    pub async fn connect(servers: &BTreeMap<String, McpServerConfig>) -> Result<Self> {
        let mut registry = ToolRegistry::new();
        let mut sessions = Vec::new();
        for (name, server) in servers {
            let command = server.resolved_command();
            let transport = StdioTransport::spawn(&command, &server.args, &server.env)?;
            let tools = McpTools::new(McpClient::new(transport));
            let count = tools.register_tools(&mut registry).await?;
            info!(server = %name, command = %command, tools = count, "connected MCP server");
            sessions.push((name.clone(), tools));
        }
        Ok(Self { registry, sessions })
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn shutdown(self) -> Result<()> {
        for (name, session) in self.sessions {
            debug!(server = %name, "closing MCP server");
            session.close().await?;
        }
        Ok(())
    }

    /// Close every server and hand back `outcome`. A failed run keeps its
    /// own error; a shutdown failure is only returned after a successful run.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let shutdown = self.shutdown().await;
        settle(outcome, shutdown)
    }
}

fn settle<T>(outcome: Result<T>, shutdown: Result<()>) -> Result<T> {
    match (outcome, shutdown) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "failed to shut down MCP servers");
            Err(err)
        }
    }
}

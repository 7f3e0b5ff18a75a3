use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{
    CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    McpToolDefinition, ServerCapabilities, ServerInfo, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::error::{MathGraphError, Result};
use crate::tool::ToolRegistry;

/// Serves a [`ToolRegistry`] over newline-delimited JSON-RPC.
pub struct McpServer {
    info: ServerInfo,
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(name: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
            tools,
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Answer frames from `reader` until it reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.info.name, tools = self.tools.len(), "MCP server listening");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut frame = serde_json::to_string(&response)?;
                frame.push('\n');
                writer.write_all(frame.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        info!(server = %self.info.name, "MCP client disconnected");
        Ok(())
    }

    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "unparseable MCP frame");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {err}"),
                ));
            }
        };
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(err) => Some(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("invalid request: {err}"),
            )),
        }
    }

    /// Dispatch one request. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, id = ?request.id, "MCP request");
        let Some(id) = request.id else {
            debug!(method = %request.method, "MCP notification");
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.list_tools()),
            "tools/call" => match self.call_tool(request.params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(message) => JsonRpcResponse::failure(id, INVALID_PARAMS, message),
            },
            other => {
                JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("method not found: {other}"))
            }
        };
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({ "listChanged": false })),
                resources: None,
                prompts: None,
            },
            server_info: self.info.clone(),
        };
        serde_json::to_value(result).unwrap_or(Value::Null)
    }

    fn list_tools(&self) -> Value {
        let tools = self
            .tools
            .describe()
            .into_iter()
            .map(|tool| McpToolDefinition {
                name: tool.name,
                description: Some(tool.description),
                input_schema: tool
                    .parameters
                    .unwrap_or_else(|| json!({ "type": "object" })),
            })
            .collect();
        serde_json::to_value(ListToolsResult { tools }).unwrap_or(Value::Null)
    }

    async fn call_tool(&self, params: Option<Value>) -> std::result::Result<Value, String> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "tools/call requires a string `name`".to_string())?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let result = match self.tools.call(name, arguments).await {
            Ok(output) => {
                info!(tool = name, "tool call succeeded");
                let text = match output {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                CallToolResult::text(text, false)
            }
            Err(err) => {
                warn!(tool = name, error = %err, "tool call failed");
                CallToolResult::text(describe_failure(&err), true)
            }
        };
        serde_json::to_value(result).map_err(|err| err.to_string())
    }
}

fn describe_failure(err: &MathGraphError) -> String {
    match err {
        MathGraphError::ToolInvocation { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::calculator_toolkit;

    fn server() -> McpServer {
        McpServer::new("math", calculator_toolkit())
    }

    fn request(id: u64, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            id: Some(json!(id)),
            ..JsonRpcRequest::new(method, params)
        }
    }

    #[tokio::test]
    async fn answers_initialize() {
        let response = server()
            .handle(request(1, "initialize", Some(json!({}))))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "math");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let reply = server()
            .handle(JsonRpcRequest::new("notifications/initialized", None))
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn lists_sorted_tools_with_schemas() {
        let response = server().handle(request(2, "tools/list", None)).await.unwrap();
        let result: ListToolsResult = serde_json::from_value(response.result.unwrap()).unwrap();
        let names: Vec<&str> = result.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "multiply"]);
        assert_eq!(result.tools[0].input_schema["required"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn calls_tools() {
        let response = server()
            .handle(request(
                3,
                "tools/call",
                Some(json!({"name": "add", "arguments": {"a": 3, "b": 5}})),
            ))
            .await
            .unwrap();
        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(!result.is_error);
        let output: Value = serde_json::from_str(&result.joined_text()).unwrap();
        assert_eq!(output["result"], json!(8));
    }

    #[tokio::test]
    async fn tool_failures_are_flagged_results() {
        let response = server()
            .handle(request(
                4,
                "tools/call",
                Some(json!({"name": "divide", "arguments": {"a": 1, "b": 0}})),
            ))
            .await
            .unwrap();
        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(result.is_error);
        assert!(result.joined_text().contains("divide"));
    }

    #[tokio::test]
    async fn rejects_unknown_methods_and_bad_frames() {
        let server = server();
        let unknown = server.handle(request(5, "resources/list", None)).await.unwrap();
        assert_eq!(unknown.error.unwrap().code, METHOD_NOT_FOUND);

        let garbage = server.handle_line("{not json").await.unwrap();
        assert_eq!(garbage.error.unwrap().code, PARSE_ERROR);

        let missing_name = server
            .handle(request(6, "tools/call", Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(missing_name.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn serves_until_eof() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n"
        );
        let mut output = Vec::new();
        server()
            .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let frames: Vec<JsonRpcResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id, json!(1));
        assert_eq!(frames[1].id, json!(2));
    }
}

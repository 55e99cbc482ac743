use crate::app::App;
use crate::errors::{ErrorCode, McpError, ToolError};
use crate::mcp::catalog::{list_tools, validate_tool_args};
use crate::mcp::protocol::{tool_result, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::routes::{is_host_tool, route_for};
use crate::utils::output::render_json;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "proxmox-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct McpServer {
    app: Arc<App>,
}

impl McpServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })
    }

    fn handle_tools_list(&self) -> Value {
        serde_json::json!({ "tools": list_tools(self.app.config.enable_host_exec) })
    }

    /// Protocol problems (unknown tool, schema violations) are JSON-RPC errors; anything a
    /// handler reports comes back as a tool result with `isError`.
    pub async fn handle_tools_call(&self, name: &str, args: Value) -> Result<Value, McpError> {
        if route_for(name).is_none() || (is_host_tool(name) && !self.app.config.enable_host_exec)
        {
            return Err(McpError::new(
                ErrorCode::InvalidParams,
                format!("Unknown tool: {}", name),
            ));
        }
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        validate_tool_args(name, &args)?;

        match self.app.tool_executor.execute(name, args).await {
            Ok(output) => Ok(tool_result(output.text, output.is_error)),
            Err(err) => Ok(tool_result(render_json(&err.to_payload()), true)),
        }
    }

    /// Handles one line of input; `None` when nothing should be written back.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let parsed: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    McpError::new(ErrorCode::ParseError, "Parse error"),
                ))
            }
        };
        let request: JsonRpcRequest = match serde_json::from_value(parsed) {
            Ok(req) => req,
            Err(_) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    McpError::new(ErrorCode::InvalidRequest, "Invalid request"),
                ))
            }
        };
        if request.is_notification() {
            self.app
                .logger
                .debug("notification", Some(&Value::String(request.method)));
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => {
                let params = request.params.as_object().cloned().unwrap_or_default();
                match params.get("name").and_then(|v| v.as_str()) {
                    Some(name) if !name.is_empty() => {
                        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                        self.handle_tools_call(name, args).await
                    }
                    _ => Err(McpError::invalid_params("Missing tool name")),
                }
            }
            _ => Err(McpError::new(ErrorCode::MethodNotFound, "Method not found")),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err),
        })
    }

    async fn serve<W>(&self, writer: &mut BufWriter<W>) -> Result<(), ToolError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                line = reader.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    self.app.logger.info("Interrupted", None);
                    return Ok(());
                }
            };
            let Some(line) = line else {
                return Ok(());
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(trimmed).await {
                let payload = serde_json::to_string(&response)
                    .map_err(|err| ToolError::internal(err.to_string()))?;
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
    }

    /// Serves newline-delimited JSON-RPC on stdin/stdout until EOF or Ctrl-C, then closes the
    /// session whichever way the loop ended.
    pub async fn run_stdio(&self) -> Result<(), ToolError> {
        let mut writer = BufWriter::new(tokio::io::stdout());
        self.app.logger.info("Proxmox MCP server running on stdio", None);
        let result = self.serve(&mut writer).await;
        self.app.shutdown().await;
        result
    }
}

pub async fn run_stdio() -> Result<(), ToolError> {
    let app = Arc::new(App::initialize().await?);
    McpServer::new(app).run_stdio().await
}

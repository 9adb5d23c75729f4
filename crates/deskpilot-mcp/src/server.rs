//! MCP server: line-delimited JSON-RPC over stdio (or any reader/writer pair).

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::protocol::{self, Request, RequestId, Response, RpcError};
use crate::tools::{self, ToolResult};

const SERVER_NAME: &str = "deskpilot";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Executes tool calls. Failures belong in the returned [`ToolResult`];
/// a handler never fails the RPC itself.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult;
}

/// Answers MCP requests from one client. Tool calls are delegated to `H`.
pub struct McpServer<H: ToolHandler> {
    handler: H,
    initialized: bool,
}

impl<H: ToolHandler> McpServer<H> {
    pub fn new(handler: H) -> Self {
        McpServer {
            handler,
            initialized: false,
        }
    }

    /// Serve stdin/stdout until EOF.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Starting MCP server on stdio");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve one request per line from `reader`, answering on `writer`.
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            debug!(bytes = message.len(), "Received message");

            let Some(response) = self.handle_message(message).await else {
                continue;
            };
            let response_json = protocol::serialize_response_string(&response)?;

            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    /// `None` for notifications.
    async fn handle_message(&mut self, message: &str) -> Option<Response> {
        match protocol::parse_request_str(message) {
            Ok(request) => self.handle_request(request).await,
            Err(err) => {
                warn!(error = %err, "Rejected message");
                Some(Response::from_error(RequestId::Null, err))
            }
        }
    }

    async fn handle_request(&mut self, request: Request) -> Option<Response> {
        let params = request.params.unwrap_or(Value::Null);
        let Some(id) = request.id else {
            debug!(method = %request.method, "Notification");
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, params),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, params).await,
            "ping" => Response::success(id, json!({})),
            method => {
                warn!(method, "Unknown method");
                Response::from_error(id, RpcError::MethodNotFound(method.to_string()))
            }
        };
        Some(response)
    }

    fn handle_initialize(&mut self, id: RequestId, params: Value) -> Response {
        self.initialized = true;
        let client = params["clientInfo"]["name"].as_str().unwrap_or("unknown");
        info!(client, "MCP server initialized");

        Response::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION,
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: RequestId) -> Response {
        Response::success(id, json!({ "tools": tools::all_tools() }))
    }

    /// Unknown tools and malformed arguments are RPC errors; anything the
    /// handler reports comes back as a successful result.
    async fn handle_tools_call(&self, id: RequestId, params: Value) -> Response {
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return Response::from_error(id, RpcError::InvalidParams("Missing 'name' field".to_string()));
        };

        if tools::get_tool(name).is_none() {
            return Response::from_error(id, RpcError::InvalidParams(format!("Unknown tool: {}", name)));
        }

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
            Some(args @ Value::Object(_)) => args.clone(),
            Some(_) => {
                return Response::from_error(
                    id,
                    RpcError::InvalidParams("'arguments' must be an object".to_string()),
                )
            }
        };

        debug!(tool = name, "Calling tool");
        let result = self.handler.call(name, arguments).await;

        match serde_json::to_value(result) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::from_error(id, RpcError::InternalError(e.to_string())),
        }
    }
}

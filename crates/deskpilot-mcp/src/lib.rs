//! MCP (Model Context Protocol) server for deskpilot
//!
//! Self-contained JSON-RPC 2.0 over line-delimited stdio, plus the tool
//! surface that drives remote display sessions:
//!
//! - Sessions: `vnc_connect`, `vnc_disconnect`, `vnc_status`
//! - Frames and input: `vnc_screenshot`, `vnc_key_press`, `vnc_type_text`,
//!   `vnc_send_shortcut`, `vnc_mouse_*`
//! - Firmware setup: `uefi_*`
//! - Operating system: `system_*`
//! - Composite: `vnc_run_scenario`, `vnc_boot_to_os`
//!
//! # Example
//!
//! ```no_run
//! use deskpilot_mcp::{McpServer, ToolHandler, ToolResult};
//! use serde_json::Value;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl ToolHandler for Echo {
//!     async fn call(&self, name: &str, arguments: Value) -> ToolResult {
//!         ToolResult::json(&serde_json::json!({"success": true, "tool": name, "args": arguments}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     McpServer::new(Echo).run().await
//! }
//! ```

pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{Request, RequestId, Response, RpcError};
pub use server::{McpServer, ToolHandler};
pub use tools::{all_tools, get_tool, ToolContent, ToolDefinition, ToolResult};

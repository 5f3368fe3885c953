//! # tooldock-mcp
//!
//! MCP (Model Context Protocol) client for Tooldock.
//!
//! This crate provides:
//! - A stdio transport that owns the server process
//! - The JSON-RPC line codec and MCP payload types
//! - A protocol session with handshake, tool discovery, and tool calls
//! - A tool bridge that exposes discovered tools to an agent
//! - Server lifecycle management
//!
//! ```no_run
//! use tooldock_mcp::{run_scoped, McpServerConfig};
//!
//! # async fn demo() -> Result<(), tooldock_mcp::McpError> {
//! let config = McpServerConfig::new("example-tools", "python3")
//!     .with_args(vec!["mcp_server_stdio.py".to_string()]);
//!
//! let text = run_scoped(config, |bridge| async move {
//!     bridge.invoke("date_tool", serde_json::json!({})).await
//! })
//! .await??;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bridge::{RefreshSummary, SharedSession, ToolBridge, ToolSnapshot, ToolStub};
pub use config::McpServerConfig;
pub use error::{McpError, TransportError};
pub use manager::{run_scoped, McpServerManager, ServerStatus};
pub use protocol::{ToolDescriptor, ToolOutput};
pub use session::{McpSession, SessionState};
pub use transport::{StdioTransport, Transport};

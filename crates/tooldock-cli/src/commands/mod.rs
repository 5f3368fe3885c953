//! CLI command implementations.

pub mod config;
pub mod doctor;
pub mod shell;
pub mod tools;

use tooldock_core::error::format_error_with_suggestion;
use tooldock_mcp::McpError;

/// Render an MCP failure with a recovery hint for the terminal.
pub fn mcp_error(e: McpError) -> anyhow::Error {
    let e: tooldock_core::Error = e.into();
    anyhow::anyhow!("{}", format_error_with_suggestion(&e))
}

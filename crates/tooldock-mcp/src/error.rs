//! MCP-specific error types.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::JsonRpcError;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// The peer closed its output stream (usually because it exited).
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame that is not a valid JSON-RPC message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The server rejected the `initialize` request.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A protocol operation was attempted outside the `ready` state.
    #[error("session not ready (state: {state})")]
    SessionNotReady { state: String },

    /// Connection is not in the correct state.
    #[error("invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The server returned an error for `tools/list`.
    #[error("tool discovery failed: {0}")]
    ToolDiscovery(JsonRpcError),

    /// The server returned an error for `tools/call`.
    #[error("tool '{tool}' execution failed: {error}")]
    ToolExecution { tool: String, error: JsonRpcError },

    /// A response arrived for a request other than the outstanding one.
    #[error("protocol desync: expected response to request {expected}, got {actual}")]
    ProtocolDesync { expected: u64, actual: String },

    /// No response arrived within the configured request timeout.
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The session was shut down while a request was outstanding.
    #[error("request '{method}' cancelled: session shutting down")]
    Cancelled { method: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a malformed message error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a not-ready error for the given state.
    pub fn not_ready(state: impl ToString) -> Self {
        Self::SessionNotReady {
            state: state.to_string(),
        }
    }

    /// Whether this error leaves the session in the `stopped` state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::MalformedMessage(_)
                | Self::Handshake(_)
                | Self::ProtocolDesync { .. }
                | Self::Timeout { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Whether this error must not be downgraded to a tool result.
    ///
    /// A desynchronised stream cannot be trusted for any further call, so the
    /// caller has to tear the session down and start a new one.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::ProtocolDesync { .. })
    }
}

impl From<McpError> for tooldock_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::ProtocolDesync { .. } => {
                tooldock_core::Error::SessionInvalidated(e.to_string())
            }
            McpError::Transport(TransportError::SpawnFailed(_)) | McpError::Handshake(_) => {
                tooldock_core::Error::Startup(e.to_string())
            }
            other => tooldock_core::Error::Mcp(other.to_string()),
        }
    }
}

//! MCP protocol types and the line codec.
//!
//! This module defines the JSON-RPC 2.0 message types, the MCP-specific
//! payload structures exchanged with tool servers, and the functions that
//! turn them into (and back from) single newline-free frames.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::McpError;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Handshake request.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Notification completing the handshake.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Tool discovery request.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Tool invocation request.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Server notification that its tool set changed.
pub const METHOD_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// Liveness probe a server may send to the client.
pub const METHOD_PING: &str = "ping";

/// Text returned in place of a tool result that carried no text block.
pub const NO_CONTENT: &str = "No content returned";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

// ============================================================================
// JSON-RPC Base Types
// ============================================================================

/// JSON-RPC request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0").
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Correlation ID, unique within a session.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (servers in the wild sometimes omit it).
    #[serde(default)]
    pub code: i32,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Standard JSON-RPC error codes.
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Create an error object without data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = if self.message.is_empty() {
            "unknown error"
        } else {
            self.message.as_str()
        };
        write!(f, "{}", message)?;
        if self.code != 0 {
            write!(f, " (code {})", self.code)?;
        }
        if let Some(ref data) = self.data {
            write!(f, ": {}", data)?;
        }
        Ok(())
    }
}

/// JSON-RPC response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Request ID this is responding to.
    pub id: u64,
    /// Successful result (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn failure(id: u64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response is an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the result, or the error object if this is an error response.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC notification (no ID, no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0").
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A request expecting exactly one response.
    Request(JsonRpcRequest),
    /// A response to an earlier request.
    Response(JsonRpcResponse),
    /// A one-way message.
    Notification(JsonRpcNotification),
}

impl Message {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Notification(_) => "notification",
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Strictly increasing request ID source for one session.
///
/// IDs start at 0 and are never reused, even if the handshake is repeated on
/// the same counter.
#[derive(Debug, Default)]
pub struct RequestIds {
    next: u64,
}

impl RequestIds {
    /// Create a counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next ID.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

}

/// Encode a request as a single frame.
pub fn encode_request(method: &str, params: Option<Value>, id: u64) -> Result<String, McpError> {
    Ok(serde_json::to_string(&JsonRpcRequest::new(id, method, params))?)
}

/// Encode a notification as a single frame.
pub fn encode_notification(method: &str, params: Option<Value>) -> Result<String, McpError> {
    Ok(serde_json::to_string(&JsonRpcNotification::new(method, params))?)
}

/// Encode a response as a single frame.
pub fn encode_response(response: &JsonRpcResponse) -> Result<String, McpError> {
    Ok(serde_json::to_string(response)?)
}

/// Decode one frame into a [`Message`].
///
/// An object carrying `method` is a request (with `id`) or a notification
/// (without). An object carrying `id` and `result` or `error` is a response;
/// when both are present the error wins. Anything else is malformed.
pub fn decode(line: &str) -> Result<Message, McpError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| McpError::malformed(format!("invalid JSON: {}", e)))?;

    let Value::Object(mut obj) = value else {
        return Err(McpError::malformed("expected a JSON object"));
    };

    let jsonrpc = match obj.remove("jsonrpc") {
        Some(Value::String(version)) => version,
        _ => JSONRPC_VERSION.to_string(),
    };
    let id = take_id(&mut obj)?;
    let method = match obj.remove("method") {
        None => None,
        Some(Value::String(method)) => Some(method),
        Some(other) => {
            return Err(McpError::malformed(format!("method must be a string, got {}", other)))
        }
    };
    let params = obj.remove("params");

    match (method, id) {
        (Some(method), Some(id)) => Ok(Message::Request(JsonRpcRequest {
            jsonrpc,
            id,
            method,
            params,
        })),
        (Some(method), None) => Ok(Message::Notification(JsonRpcNotification {
            jsonrpc,
            method,
            params,
        })),
        (None, Some(id)) => {
            let error = match obj.remove("error") {
                Some(raw) => Some(serde_json::from_value::<JsonRpcError>(raw).map_err(|e| {
                    McpError::malformed(format!("invalid error object: {}", e))
                })?),
                None => None,
            };
            let result = obj.remove("result");
            if error.is_none() && result.is_none() {
                return Err(McpError::malformed(format!(
                    "response {} has neither result nor error",
                    id
                )));
            }
            Ok(Message::Response(JsonRpcResponse {
                jsonrpc,
                id,
                result: if error.is_some() { None } else { result },
                error,
            }))
        }
        (None, None) => Err(McpError::malformed("message has neither method nor id")),
    }
}

fn take_id(obj: &mut Map<String, Value>) -> Result<Option<u64>, McpError> {
    match obj.remove("id") {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| McpError::malformed(format!("id must be a non-negative integer, got {}", n))),
        Some(other) => Err(McpError::malformed(format!(
            "id must be an integer, got {}",
            other
        ))),
    }
}

// ============================================================================
// MCP Protocol Types
// ============================================================================

/// Client information sent during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "tooldock".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server information returned during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Server version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Client capabilities for initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Tool-calling support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(Value::Object(Map::new())),
        }
    }
}

/// Server capabilities returned during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tools capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    /// Resources capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Prompts capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    /// Logging capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

/// Tools capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the server announces tool set changes.
    #[serde(default)]
    pub list_changed: bool,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// MCP protocol version.
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: ClientCapabilities,
    /// Client information.
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        }
    }
}

/// Result of the initialize request.
///
/// Every field is optional on input; a bare `{}` is an acceptable handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InitializeResult {
    /// MCP protocol version.
    pub protocol_version: Option<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
    /// Server information.
    pub server_info: Option<ServerInfo>,
}

/// Result of the tools/list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// List of available tools.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    /// Cursor for pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

fn empty_schema() -> Value {
    Value::Object(Map::new())
}

/// A tool advertised by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name, unique within a session.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
}

/// Parameters for the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    pub arguments: Value,
}

/// Result of the tools/call request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content returned by the tool.
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub content: Vec<ToolContent>,
    /// Whether the tool reported a failure inside a successful response.
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// The first text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ToolContent::as_text)
    }
}

/// Decode content blocks one at a time; a block that does not fit its
/// declared type is kept as [`ToolContent::Unsupported`].
fn lenient_blocks<'de, D>(deserializer: D) -> Result<Vec<ToolContent>, D::Error>
where
    D: Deserializer<'de>,
{
    let blocks = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(blocks
        .into_iter()
        .map(|block| serde_json::from_value(block).unwrap_or(ToolContent::Unsupported))
        .collect())
}

/// Content returned by a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content (base64 encoded).
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Resource reference.
    Resource {
        /// The embedded resource.
        resource: Value,
    },
    /// A block type this client does not understand.
    #[serde(other)]
    Unsupported,
}

impl ToolContent {
    /// Get the text content if this is a text item.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// What a successful `tools/call` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    /// The first text block of the result.
    Text(String),
    /// The result held no text block.
    NoContent,
}

impl ToolOutput {
    /// Pick the first text block out of a call result.
    pub fn from_result(result: &CallToolResult) -> Self {
        match result.first_text() {
            Some(text) => Self::Text(text.to_string()),
            None => Self::NoContent,
        }
    }

    /// The text an agent should see.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::NoContent => NO_CONTENT.to_string(),
        }
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::NoContent => f.write_str(NO_CONTENT),
        }
    }
}

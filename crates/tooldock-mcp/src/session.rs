//! Protocol session over a single transport.
//!
//! An [`McpSession`] owns the transport and the request ID counter, performs
//! the `initialize` handshake, and runs exactly one request/response round
//! trip at a time. Every operation takes `&mut self`, so a second request
//! cannot be written while one is still waiting for its response.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{
    self, CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, Message, RequestIds, ServerCapabilities, ServerInfo, ToolDescriptor,
    ToolOutput, MCP_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, METHOD_TOOLS_LIST_CHANGED,
};
use crate::transport::Transport;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is up, handshake not yet attempted.
    Unstarted,
    /// `initialize` has been sent.
    Handshaking,
    /// Handshake complete; discovery and calls are allowed.
    Ready,
    /// Terminal. Nothing leaves this state.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Handshaking => write!(f, "handshaking"),
            Self::Ready => write!(f, "ready"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A JSON-RPC conversation with one MCP server.
pub struct McpSession {
    /// Server name, used in logs.
    name: String,
    /// Transport for communication.
    transport: Box<dyn Transport>,
    /// Current lifecycle state.
    state: SessionState,
    /// Request ID counter.
    ids: RequestIds,
    /// Identity sent in `initialize`.
    client_info: ClientInfo,
    /// Protocol version requested in `initialize`.
    protocol_version: String,
    /// Bound on each round trip.
    request_timeout: Option<Duration>,
    /// What the server said about itself.
    server_info: Option<ServerInfo>,
    /// Server capabilities after initialization.
    capabilities: Option<ServerCapabilities>,
    /// Tools from the last discovery.
    tools: Vec<ToolDescriptor>,
    /// Set when the server announced a tool list change.
    tools_changed: bool,
    /// Fired to abandon the outstanding request.
    shutdown: CancellationToken,
}

impl McpSession {
    /// Create a session over an already-connected transport.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            state: SessionState::Unstarted,
            ids: RequestIds::new(),
            client_info: ClientInfo::default(),
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            request_timeout: None,
            server_info: None,
            capabilities: None,
            tools: Vec::new(),
            tools_changed: false,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the identity sent in `initialize`.
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    /// Set the protocol version requested in `initialize`.
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Bound every round trip. A request that times out stops the session.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the session accepts discovery and calls.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Server identity from the handshake, if it sent one.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Server capabilities from the handshake.
    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }

    /// Tools from the last successful discovery.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Whether the server announced a tool list change since the last discovery.
    pub fn tools_changed(&self) -> bool {
        self.tools_changed
    }

    /// Handle that aborts the outstanding request without taking the session.
    ///
    /// Once cancelled, the request in flight and every later request fail
    /// with [`McpError::Cancelled`] and the session stops.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Perform the `initialize` handshake.
    ///
    /// Valid only once, from [`SessionState::Unstarted`]. Any failure leaves
    /// the session stopped.
    pub async fn initialize(&mut self) -> Result<(), McpError> {
        if self.state != SessionState::Unstarted {
            return Err(McpError::invalid_state(
                SessionState::Unstarted.to_string(),
                self.state.to_string(),
            ));
        }

        debug!(server = %self.name, "Initializing MCP session");
        self.state = SessionState::Handshaking;

        let result = match self.handshake().await {
            Ok(result) => result,
            Err(e) => {
                self.stop_on(&e);
                return Err(e);
            }
        };

        let server_name = result
            .server_info
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        info!(
            server = %self.name,
            server_name = %server_name,
            protocol_version = result.protocol_version.as_deref().unwrap_or("unspecified"),
            "MCP session initialized"
        );

        self.server_info = result.server_info;
        self.capabilities = Some(result.capabilities);
        self.state = SessionState::Ready;

        Ok(())
    }

    async fn handshake(&mut self) -> Result<InitializeResult, McpError> {
        let params = InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: self.client_info.clone(),
        };

        let value = self
            .request(METHOD_INITIALIZE, Some(serde_json::to_value(params)?))
            .await?
            .map_err(|e| McpError::Handshake(e.to_string()))?;

        let result = if value.is_null() {
            InitializeResult::default()
        } else {
            serde_json::from_value(value)
                .map_err(|e| McpError::Handshake(format!("invalid initialize result: {}", e)))?
        };

        self.notify(METHOD_INITIALIZED, None).await?;

        Ok(result)
    }

    /// List the server's tools, in the order the server reports them.
    pub async fn discover_tools(&mut self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.ensure_ready()?;

        debug!(server = %self.name, "Listing tools");

        let value = self
            .request(METHOD_TOOLS_LIST, None)
            .await?
            .map_err(McpError::ToolDiscovery)?;

        let result: ListToolsResult = if value.is_null() {
            ListToolsResult::default()
        } else {
            serde_json::from_value(value)?
        };

        if let Some(cursor) = result.next_cursor {
            debug!(server = %self.name, cursor = %cursor, "Ignoring further tool pages");
        }

        debug!(
            server = %self.name,
            tool_count = result.tools.len(),
            "Listed tools"
        );

        self.tools = result.tools;
        self.tools_changed = false;

        Ok(self.tools.clone())
    }

    /// Call a tool on the server.
    ///
    /// Missing or null arguments are sent as `{}`. The result is the first
    /// text block of the response, or [`ToolOutput::NoContent`].
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<ToolOutput, McpError> {
        self.ensure_ready()?;

        debug!(server = %self.name, tool = name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments: match arguments {
                None | Some(Value::Null) => json!({}),
                Some(arguments) => arguments,
            },
        };

        let value = self
            .request(METHOD_TOOLS_CALL, Some(serde_json::to_value(params)?))
            .await?
            .map_err(|error| McpError::ToolExecution {
                tool: name.to_string(),
                error,
            })?;

        let result: CallToolResult = if value.is_null() {
            CallToolResult::default()
        } else {
            serde_json::from_value(value)?
        };

        if result.is_error {
            warn!(
                server = %self.name,
                tool = name,
                "Tool returned error"
            );
        }

        Ok(ToolOutput::from_result(&result))
    }

    /// Stop the session and close the transport. Calling it twice is a no-op.
    pub async fn close(&mut self) -> Result<(), McpError> {
        if self.state != SessionState::Stopped {
            debug!(server = %self.name, state = %self.state, "Closing MCP session");
        }
        self.state = SessionState::Stopped;
        self.shutdown.cancel();
        self.transport.close().await?;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(McpError::not_ready(self.state))
        }
    }

    fn stop_on(&mut self, error: &McpError) {
        if self.state != SessionState::Stopped {
            warn!(server = %self.name, error = %error, "MCP session stopped");
            self.state = SessionState::Stopped;
        }
    }

    /// Send a request and wait for its response.
    ///
    /// The outer error is a session-level failure; the inner one is the
    /// server's JSON-RPC error object.
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Result<Value, JsonRpcError>, McpError> {
        let id = self.ids.next_id();
        let line = protocol::encode_request(method, params, id)?;

        let shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(McpError::Cancelled {
                method: method.to_string(),
            }),
            outcome = self.exchange(method, id, &line) => outcome,
        };

        if let Err(ref e) = outcome {
            if e.is_fatal() {
                self.stop_on(e);
            }
        }

        outcome
    }

    async fn exchange(
        &mut self,
        method: &str,
        id: u64,
        line: &str,
    ) -> Result<Result<Value, JsonRpcError>, McpError> {
        match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.round_trip(id, line)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                }),
            },
            None => self.round_trip(id, line).await,
        }
    }

    async fn round_trip(
        &mut self,
        id: u64,
        line: &str,
    ) -> Result<Result<Value, JsonRpcError>, McpError> {
        self.transport.send(line).await?;

        loop {
            let frame = self.transport.receive().await?;
            match protocol::decode(&frame)? {
                Message::Response(response) => {
                    if response.id != id {
                        return Err(McpError::ProtocolDesync {
                            expected: id,
                            actual: response.id.to_string(),
                        });
                    }
                    return Ok(response.into_result());
                }
                Message::Notification(notification) => self.on_notification(notification),
                Message::Request(request) => self.answer(request).await?,
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = protocol::encode_notification(method, params)?;
        self.transport.send(&line).await?;
        Ok(())
    }

    fn on_notification(&mut self, notification: JsonRpcNotification) {
        if notification.method == METHOD_TOOLS_LIST_CHANGED {
            info!(server = %self.name, "Server tool list changed");
            self.tools_changed = true;
        } else {
            debug!(
                server = %self.name,
                method = %notification.method,
                "Ignoring server notification"
            );
        }
    }

    /// Answer a request the server sent while we were waiting on ours.
    async fn answer(&mut self, request: JsonRpcRequest) -> Result<(), McpError> {
        let response = if request.method == METHOD_PING {
            JsonRpcResponse::success(request.id, json!({}))
        } else {
            debug!(server = %self.name, method = %request.method, "Rejecting server request");
            JsonRpcResponse::failure(
                request.id,
                JsonRpcError::new(
                    JsonRpcError::METHOD_NOT_FOUND,
                    format!("method not found: {}", request.method),
                ),
            )
        };
        let line = protocol::encode_response(&response)?;
        self.transport.send(&line).await?;
        Ok(())
    }
}

impl fmt::Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("tools", &self.tools.len())
            .finish()
    }
}

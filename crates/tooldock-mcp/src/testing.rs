//! In-memory transport for driving sessions without a child process.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::protocol::{
    self, JsonRpcError, JsonRpcRequest, JsonRpcResponse, Message, METHOD_INITIALIZE,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::session::McpSession;
use crate::transport::Transport;

type Responder = Box<dyn FnMut(&Message) -> Vec<String> + Send + Sync>;

/// A transport whose peer is a closure: every frame sent is decoded and
/// handed to the responder, and the frames it returns become readable.
pub(crate) struct ScriptedTransport {
    responder: Responder,
    inbox: VecDeque<String>,
    sent: Arc<Mutex<Vec<String>>>,
    hang_when_idle: bool,
    connected: bool,
}

impl ScriptedTransport {
    pub(crate) fn new(
        responder: impl FnMut(&Message) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            inbox: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            hang_when_idle: false,
            connected: true,
        }
    }

    /// Block in `receive` instead of reporting EOF when nothing is queued.
    pub(crate) fn hang_when_idle(mut self) -> Self {
        self.hang_when_idle = true;
        self
    }

    /// Handle to every frame the client wrote.
    pub(crate) fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(message.to_string());
        if let Ok(decoded) = protocol::decode(message) {
            let replies = (self.responder)(&decoded);
            self.inbox.extend(replies);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        match self.inbox.pop_front() {
            Some(frame) => Ok(frame),
            None if self.hang_when_idle => futures::future::pending().await,
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

pub(crate) fn ok(id: u64, result: Value) -> String {
    protocol::encode_response(&JsonRpcResponse::success(id, result)).unwrap()
}

pub(crate) fn err(id: u64, message: &str) -> String {
    protocol::encode_response(&JsonRpcResponse::failure(id, JsonRpcError::new(0, message)))
        .unwrap()
}

/// Requests the client sent, in order, skipping notifications and responses.
pub(crate) fn sent_requests(sent: &Mutex<Vec<String>>) -> Vec<JsonRpcRequest> {
    sent.lock()
        .iter()
        .filter_map(|line| match protocol::decode(line) {
            Ok(Message::Request(request)) => Some(request),
            _ => None,
        })
        .collect()
}

/// A well-behaved server with `echo`, `fail` and `empty` tools.
pub(crate) fn tool_server() -> impl FnMut(&Message) -> Vec<String> + Send + Sync + 'static {
    tool_server_with(vec![
        json!({"name": "echo", "description": "Echo text back", "inputSchema": {"type": "object"}}),
        json!({"name": "fail", "description": "Always rejects its input"}),
        json!({"name": "empty", "description": "Returns nothing"}),
    ])
}

/// Like [`tool_server`], advertising the given tool list.
pub(crate) fn tool_server_with(
    tools: Vec<Value>,
) -> impl FnMut(&Message) -> Vec<String> + Send + Sync + 'static {
    move |message| {
        let Message::Request(request) = message else {
            return Vec::new();
        };
        let reply = match request.method.as_str() {
            METHOD_INITIALIZE => ok(
                request.id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {"listChanged": true}},
                    "serverInfo": {"name": "scripted", "version": "1.0.0"}
                }),
            ),
            METHOD_TOOLS_LIST => ok(request.id, json!({ "tools": tools })),
            METHOD_TOOLS_CALL => call_reply(request),
            _ => err(request.id, "method not found"),
        };
        vec![reply]
    }
}

fn call_reply(request: &JsonRpcRequest) -> String {
    let params = request.params.clone().unwrap_or(Value::Null);
    match params["name"].as_str() {
        Some("echo") => {
            let text = params["arguments"]["text"].as_str().unwrap_or("hi");
            ok(request.id, json!({"content": [{"type": "text", "text": text}]}))
        }
        Some("fail") => err(request.id, "bad arg"),
        Some("empty") => ok(request.id, json!({"content": []})),
        _ => err(request.id, "unknown tool"),
    }
}

/// A session over [`tool_server`] that has completed the handshake.
pub(crate) async fn ready_session() -> (McpSession, Arc<Mutex<Vec<String>>>) {
    let transport = ScriptedTransport::new(tool_server());
    let sent = transport.sent();
    let mut session = McpSession::new("scripted", Box::new(transport));
    session.initialize().await.unwrap();
    (session, sent)
}

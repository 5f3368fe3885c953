//! Bridge between discovered MCP tools and an agent.
//!
//! The bridge turns each discovered [`ToolDescriptor`] into a [`ToolStub`]:
//! the descriptor plus a bound invoker that forwards calls to the session.
//! Stubs live in an immutable [`ToolSnapshot`]; `refresh` builds a new
//! snapshot and swaps it in, so readers never see a half-updated registry.
//!
//! This is also the one place where per-call failures become text. An agent
//! calling [`ToolBridge::invoke`] gets either the tool's output or an error
//! string, except for a protocol desync which ends the session.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tooldock_core::{ToolCall, ToolDefinition, ToolResult};

use crate::error::McpError;
use crate::protocol::{ToolDescriptor, ToolOutput};
use crate::session::{McpSession, SessionState};

/// A session shared between the lifecycle manager and tool stubs.
pub type SharedSession = Arc<Mutex<McpSession>>;

/// Future returned by a stub's invoker.
pub type ToolFuture = BoxFuture<'static, Result<ToolOutput, McpError>>;

/// Bound call target for one tool.
pub type Invoker = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A callable record for one discovered tool.
#[derive(Clone)]
pub struct ToolStub {
    /// What the server advertised.
    pub descriptor: ToolDescriptor,
    invoker: Invoker,
}

impl ToolStub {
    /// Bind a stub to a session. The stub does not keep the session alive.
    pub fn bind(descriptor: ToolDescriptor, session: Weak<Mutex<McpSession>>) -> Self {
        let name = descriptor.name.clone();
        let invoker: Invoker = Arc::new(move |arguments: Value| {
            let session = session.clone();
            let name = name.clone();
            async move {
                let session = session
                    .upgrade()
                    .ok_or_else(|| McpError::not_ready(SessionState::Stopped))?;
                let mut session = session.lock().await;
                let output = session.call_tool(&name, Some(arguments)).await?;
                Ok::<_, McpError>(output)
            }
            .boxed()
        });
        Self {
            descriptor,
            invoker,
        }
    }

    /// Get the tool name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Call the tool.
    pub async fn call(&self, arguments: Value) -> Result<ToolOutput, McpError> {
        (self.invoker)(arguments).await
    }

    /// Convert to the agent-facing definition.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.descriptor.name, &self.descriptor.description)
            .with_parameters(self.descriptor.input_schema.clone())
    }
}

impl fmt::Debug for ToolStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolStub")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// One immutable generation of the tool registry.
#[derive(Debug, Default)]
pub struct ToolSnapshot {
    tools: HashMap<String, ToolStub>,
    order: Vec<String>,
    system_prompt: String,
}

impl ToolSnapshot {
    /// Build a snapshot from discovered descriptors.
    ///
    /// Later duplicates of a name replace earlier ones but keep the first
    /// position.
    pub fn build(
        descriptors: Vec<ToolDescriptor>,
        session: &Weak<Mutex<McpSession>>,
        base_prompt: &str,
    ) -> Self {
        let system_prompt = render_system_prompt(base_prompt, &descriptors);
        let mut tools = HashMap::with_capacity(descriptors.len());
        let mut order = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let stub = ToolStub::bind(descriptor, session.clone());
            if tools.insert(name.clone(), stub).is_some() {
                warn!(tool = %name, "Server advertised a tool name twice");
            } else {
                order.push(name);
            }
        }

        Self {
            tools,
            order,
            system_prompt,
        }
    }

    /// An empty snapshot carrying only the base prompt.
    pub fn empty(base_prompt: &str) -> Self {
        Self {
            system_prompt: render_system_prompt(base_prompt, &[]),
            ..Self::default()
        }
    }

    /// Look up a stub by name.
    pub fn get(&self, name: &str) -> Option<&ToolStub> {
        self.tools.get(name)
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in server order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Stubs in server order.
    pub fn stubs(&self) -> impl Iterator<Item = &ToolStub> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    /// Agent-facing definitions in server order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.stubs().map(ToolStub::definition).collect()
    }

    /// The system prompt for this generation of tools.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if there are no tools.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Append the tool list to the base prompt.
fn render_system_prompt(base_prompt: &str, descriptors: &[ToolDescriptor]) -> String {
    if descriptors.is_empty() {
        return base_prompt.to_string();
    }

    let mut prompt = String::from(base_prompt);
    prompt.push_str("\n\nAvailable tools:");
    for descriptor in descriptors {
        prompt.push_str(&format!("\n- {}: {}", descriptor.name, descriptor.description));
    }
    prompt
}

/// What changed in a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Tools that were not in the previous snapshot.
    pub added: Vec<String>,
    /// Tools that are no longer offered.
    pub removed: Vec<String>,
    /// Tools in the new snapshot.
    pub total: usize,
}

impl RefreshSummary {
    fn between(previous: &ToolSnapshot, current: &ToolSnapshot) -> Self {
        let before: HashSet<&String> = previous.order.iter().collect();
        let after: HashSet<&String> = current.order.iter().collect();
        Self {
            added: current
                .order
                .iter()
                .filter(|name| !before.contains(name))
                .cloned()
                .collect(),
            removed: previous
                .order
                .iter()
                .filter(|name| !after.contains(name))
                .cloned()
                .collect(),
            total: current.len(),
        }
    }

    /// Check if the tool set is unchanged.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl fmt::Display for RefreshSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tools ({} added, {} removed)",
            self.total,
            self.added.len(),
            self.removed.len()
        )
    }
}

/// Exposes a session's tools to an agent.
pub struct ToolBridge {
    session: Weak<Mutex<McpSession>>,
    base_prompt: String,
    snapshot: RwLock<Arc<ToolSnapshot>>,
}

impl ToolBridge {
    /// Create a bridge with an empty snapshot.
    pub fn new(session: &SharedSession, base_prompt: impl Into<String>) -> Self {
        let base_prompt = base_prompt.into();
        Self {
            session: Arc::downgrade(session),
            snapshot: RwLock::new(Arc::new(ToolSnapshot::empty(&base_prompt))),
            base_prompt,
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ToolSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// The current system prompt.
    pub fn system_prompt(&self) -> String {
        self.snapshot().system_prompt().to_string()
    }

    /// Agent-facing definitions of the current tools.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.snapshot().definitions()
    }

    /// Rediscover tools and swap in a new snapshot.
    pub async fn refresh(&self) -> Result<RefreshSummary, McpError> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| McpError::not_ready(SessionState::Stopped))?;
        let descriptors = session.lock().await.discover_tools().await?;

        let next = Arc::new(ToolSnapshot::build(
            descriptors,
            &self.session,
            &self.base_prompt,
        ));
        let previous = std::mem::replace(&mut *self.snapshot.write(), Arc::clone(&next));

        let summary = RefreshSummary::between(&previous, &next);
        info!(
            total = summary.total,
            added = summary.added.len(),
            removed = summary.removed.len(),
            "Tool registry refreshed"
        );

        Ok(summary)
    }

    /// Refresh only if the server announced a tool list change.
    pub async fn refresh_if_changed(&self) -> Result<Option<RefreshSummary>, McpError> {
        let Some(session) = self.session.upgrade() else {
            return Ok(None);
        };
        let changed = session.lock().await.tools_changed();
        if !changed {
            return Ok(None);
        }
        debug!("Server tool list changed, refreshing");
        self.refresh().await.map(Some)
    }

    /// Invoke a tool by name and return text for the agent.
    ///
    /// Unknown names and failed calls come back as `Ok` error strings. Only
    /// [`McpError::ProtocolDesync`] is returned as `Err`.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        Ok(match self.dispatch(name, arguments).await? {
            Ok(text) => text,
            Err(message) => message,
        })
    }

    /// Execute a [`ToolCall`] and report it as a timed [`ToolResult`].
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, McpError> {
        let started = Instant::now();
        let result = match self.dispatch(&call.name, call.arguments.clone()).await? {
            Ok(text) => ToolResult::success(&call.id, text),
            Err(message) => ToolResult::error(&call.id, message),
        };
        Ok(result.with_duration(started.elapsed().as_millis() as u64))
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Result<String, String>, McpError> {
        let snapshot = self.snapshot();
        let Some(stub) = snapshot.get(name).cloned() else {
            warn!(tool = name, "Agent asked for an unknown tool");
            return Ok(Err(format!("Error: no tool named '{}' is available", name)));
        };
        drop(snapshot);

        match stub.call(arguments).await {
            Ok(output) => Ok(Ok(output.into_text())),
            Err(e) if e.invalidates_session() => Err(e),
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                Ok(Err(format!("Tool execution failed: {}", e)))
            }
        }
    }
}

impl fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolBridge")
            .field("tools", &self.snapshot().names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, METHOD_INITIALIZE, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST};
    use crate::testing::{
        ok, ready_session, sent_requests, tool_server, tool_server_with, ScriptedTransport,
    };
    use serde_json::json;

    fn shared(session: McpSession) -> SharedSession {
        Arc::new(Mutex::new(session))
    }

    #[tokio::test]
    async fn test_refresh_builds_snapshot() {
        let (session, _) = ready_session().await;
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "You are helpful.");
        assert!(bridge.snapshot().is_empty());
        assert_eq!(bridge.system_prompt(), "You are helpful.");

        let summary = bridge.refresh().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.added, vec!["echo", "fail", "empty"]);
        assert!(summary.removed.is_empty());

        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.names(), ["echo", "fail", "empty"]);
        assert!(snapshot.contains("echo"));
        assert_eq!(
            snapshot.system_prompt(),
            "You are helpful.\n\nAvailable tools:\n- echo: Echo text back\n\
             - fail: Always rejects its input\n- empty: Returns nothing"
        );

        let definitions = bridge.definitions();
        assert_eq!(definitions[0].name, "echo");
        assert_eq!(definitions[0].parameters, json!({"type": "object"}));
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let mut generation = 0;
        let transport = ScriptedTransport::new(move |message: &Message| {
            let Message::Request(request) = message else {
                return Vec::new();
            };
            match request.method.as_str() {
                METHOD_INITIALIZE => vec![ok(request.id, json!({}))],
                METHOD_TOOLS_LIST => {
                    generation += 1;
                    let tools = if generation == 1 {
                        json!([{"name": "date_tool"}, {"name": "web_search"}])
                    } else {
                        json!([{"name": "web_search"}, {"name": "calculator"}])
                    };
                    vec![ok(request.id, json!({ "tools": tools }))]
                }
                _ => Vec::new(),
            }
        });
        let mut session = McpSession::new("evolving", Box::new(transport));
        session.initialize().await.unwrap();
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");

        bridge.refresh().await.unwrap();
        let old = bridge.snapshot();

        let summary = bridge.refresh().await.unwrap();
        assert_eq!(summary.added, vec!["calculator"]);
        assert_eq!(summary.removed, vec!["date_tool"]);
        assert_eq!(summary.total, 2);
        assert!(!summary.is_unchanged());

        // The old generation is untouched
        assert!(old.contains("date_tool"));
        assert!(!bridge.snapshot().contains("date_tool"));
        assert!(bridge.snapshot().contains("calculator"));
    }

    #[tokio::test]
    async fn test_invoke_returns_text() {
        let (session, _) = ready_session().await;
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");
        bridge.refresh().await.unwrap();

        let text = bridge.invoke("echo", json!({"text": "hello"})).await.unwrap();
        assert_eq!(text, "hello");

        let text = bridge.invoke("empty", json!({})).await.unwrap();
        assert_eq!(text, "No content returned");

        let text = bridge.invoke("fail", json!({})).await.unwrap();
        assert!(text.contains("bad arg"), "got: {}", text);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_sends_nothing() {
        let (session, sent) = ready_session().await;
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");
        bridge.refresh().await.unwrap();
        let before = sent.lock().len();

        let text = bridge.invoke("nonexistent", json!({})).await.unwrap();
        assert!(text.starts_with("Error:"));
        assert!(text.contains("nonexistent"));
        assert_eq!(sent.lock().len(), before);
    }

    #[tokio::test]
    async fn test_invoke_ids_increase() {
        let (session, sent) = ready_session().await;
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");
        bridge.refresh().await.unwrap();

        for _ in 0..3 {
            bridge.invoke("echo", json!({})).await.unwrap();
        }

        let call_ids: Vec<u64> = sent_requests(&sent)
            .iter()
            .filter(|r| r.method == METHOD_TOOLS_CALL)
            .map(|r| r.id)
            .collect();
        assert_eq!(call_ids.len(), 3);
        assert!(call_ids.windows(2).all(|w| w[0] < w[1]));
        assert!(call_ids[0] > 1);
    }

    #[tokio::test]
    async fn test_invoke_propagates_desync() {
        let mut server = tool_server_with(vec![json!({"name": "echo"})]);
        let transport = ScriptedTransport::new(move |message: &Message| match message {
            Message::Request(request) if request.method == METHOD_TOOLS_CALL => {
                vec![ok(request.id + 1, json!({"content": []}))]
            }
            other => server(other),
        });
        let mut session = McpSession::new("confused", Box::new(transport));
        session.initialize().await.unwrap();
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");
        bridge.refresh().await.unwrap();

        let result = bridge.invoke("echo", json!({})).await;
        assert!(matches!(result, Err(McpError::ProtocolDesync { .. })));
        assert_eq!(session.lock().await.state(), SessionState::Stopped);

        // Later calls fail softly: the session is simply not ready
        let text = bridge.invoke("echo", json!({})).await.unwrap();
        assert!(text.contains("not ready"), "got: {}", text);
    }

    #[tokio::test]
    async fn test_stub_outlived_by_session() {
        let (session, _) = ready_session().await;
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");
        bridge.refresh().await.unwrap();
        drop(session);

        let text = bridge.invoke("echo", json!({})).await.unwrap();
        assert!(text.contains("not ready"), "got: {}", text);
        assert!(bridge.refresh().await.is_err());
    }

    #[tokio::test]
    async fn test_execute_reports_tool_result() {
        let (session, _) = ready_session().await;
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");
        bridge.refresh().await.unwrap();

        let call = ToolCall::generate("echo", json!({"text": "hi"}));
        let result = bridge.execute(&call).await.unwrap();
        assert!(result.success);
        assert_eq!(result.tool_call_id, call.id);
        assert_eq!(result.content(), "hi");

        let call = ToolCall::new("call_2", "fail", json!({}));
        let result = bridge.execute(&call).await.unwrap();
        assert!(!result.success);
        assert!(result.content().contains("bad arg"));
    }

    #[tokio::test]
    async fn test_refresh_if_changed() {
        let mut server = tool_server();
        let transport = ScriptedTransport::new(move |message: &Message| {
            let mut frames = Vec::new();
            if let Message::Request(request) = message {
                if request.method == METHOD_TOOLS_CALL {
                    frames.push(
                        crate::protocol::encode_notification(
                            crate::protocol::METHOD_TOOLS_LIST_CHANGED,
                            None,
                        )
                        .unwrap(),
                    );
                }
            }
            frames.extend(server(message));
            frames
        });
        let mut session = McpSession::new("changing", Box::new(transport));
        session.initialize().await.unwrap();
        let session = shared(session);
        let bridge = ToolBridge::new(&session, "");
        bridge.refresh().await.unwrap();

        assert!(bridge.refresh_if_changed().await.unwrap().is_none());

        bridge.invoke("echo", json!({})).await.unwrap();
        let summary = bridge.refresh_if_changed().await.unwrap().unwrap();
        assert!(summary.is_unchanged());
        assert_eq!(summary.total, 3);

        assert!(bridge.refresh_if_changed().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_session() {
        let mut server = tool_server();
        let transport = ScriptedTransport::new(move |message: &Message| match message {
            Message::Request(request) if request.method == METHOD_TOOLS_CALL => Vec::new(),
            _ => server(message),
        })
        .hang_when_idle();
        let mut session = McpSession::new("stuck", Box::new(transport));
        session.initialize().await.unwrap();
        let shutdown = session.shutdown_handle();
        let session = shared(session);
        let bridge = Arc::new(ToolBridge::new(&session, ""));
        bridge.refresh().await.unwrap();

        let pending = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.invoke("echo", json!({})).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.cancel();

        let text = pending.await.unwrap().unwrap();
        assert!(text.starts_with("Tool execution failed:"), "got: {}", text);
        assert!(text.contains("cancelled"), "got: {}", text);

        let mut session = tokio::time::timeout(std::time::Duration::from_secs(1), session.lock())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        session.close().await.unwrap();
    }
}

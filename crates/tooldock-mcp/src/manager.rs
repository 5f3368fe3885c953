//! MCP server lifecycle management.
//!
//! This module provides `McpServerManager`, which owns one server process
//! from spawn to shutdown: it spawns the transport, runs the handshake,
//! populates the tool bridge, and always tears the process down again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bridge::{SharedSession, ToolBridge};
use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::session::{McpSession, SessionState};
use crate::transport::StdioTransport;

/// Manages the lifecycle of one MCP server.
pub struct McpServerManager {
    /// Launch and protocol settings.
    config: McpServerConfig,
    /// The live session, if started.
    session: Option<SharedSession>,
    /// Tool bridge for the live session.
    bridge: Option<Arc<ToolBridge>>,
    /// Aborts a call in flight so `stop` can take the session.
    shutdown: Option<CancellationToken>,
    /// Process ID of the live server.
    pid: Option<u32>,
}

impl McpServerManager {
    /// Create a manager. Nothing is spawned until [`start`](Self::start).
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            session: None,
            bridge: None,
            shutdown: None,
            pid: None,
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Check if a session is live.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// The tool bridge of the live session.
    pub fn bridge(&self) -> Option<Arc<ToolBridge>> {
        self.bridge.clone()
    }

    /// Process ID of the live server.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The live session.
    pub fn session(&self) -> Option<SharedSession> {
        self.session.clone()
    }

    /// Spawn the server, perform the handshake, and discover its tools.
    ///
    /// If any step fails the process is shut down before the error is
    /// returned.
    pub async fn start(&mut self) -> Result<Arc<ToolBridge>, McpError> {
        if self.session.is_some() {
            return Err(McpError::invalid_state("stopped", "running"));
        }

        info!(
            server = %self.config.name,
            command = %self.config.command,
            "Starting MCP server"
        );

        let transport = StdioTransport::spawn(
            &self.config.command,
            &self.config.args,
            &self.config.env,
            self.config.working_dir.as_deref(),
        )
        .await?
        .with_shutdown_grace(self.config.shutdown_grace);
        let pid = transport.pid();

        let session = McpSession::new(self.config.name.clone(), Box::new(transport))
            .with_client_info(self.config.client_info.clone())
            .with_protocol_version(self.config.protocol_version.clone())
            .with_request_timeout(self.config.request_timeout);
        let shutdown = session.shutdown_handle();
        let session: SharedSession = Arc::new(Mutex::new(session));
        let bridge = Arc::new(ToolBridge::new(&session, self.config.base_prompt.clone()));

        // Owned from here on so that stop() reaches the process
        self.session = Some(Arc::clone(&session));
        self.shutdown = Some(shutdown);
        self.pid = pid;

        let started = async {
            session.lock().await.initialize().await?;
            bridge.refresh().await
        }
        .await;

        match started {
            Ok(summary) => {
                info!(
                    server = %self.config.name,
                    tools = summary.total,
                    "MCP server started"
                );
                self.bridge = Some(Arc::clone(&bridge));
                Ok(bridge)
            }
            Err(e) => {
                error!(
                    server = %self.config.name,
                    error = %e,
                    "Failed to start MCP server"
                );
                self.stop().await;
                Err(e)
            }
        }
    }

    /// Stop the server. Safe to call at any time, any number of times.
    ///
    /// A tool call still waiting for its response fails with
    /// [`McpError::Cancelled`] instead of holding up the shutdown.
    pub async fn stop(&mut self) {
        self.bridge = None;
        self.pid = None;

        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }

        let Some(session) = self.session.take() else {
            debug!(server = %self.config.name, "MCP server not running");
            return;
        };

        if let Err(e) = session.lock().await.close().await {
            error!(
                server = %self.config.name,
                error = %e,
                "Failed to close MCP server"
            );
        }

        info!(server = %self.config.name, "MCP server stopped");
    }

    /// Get server status.
    pub async fn status(&self) -> ServerStatus {
        match self.session {
            Some(ref session) => {
                let session = session.lock().await;
                ServerStatus::Running {
                    state: session.state(),
                    tool_count: session.tools().len(),
                }
            }
            None => ServerStatus::Stopped,
        }
    }
}

impl fmt::Debug for McpServerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServerManager")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Start a server, run `f` with its tool bridge, and stop the server.
///
/// The server is stopped whether `f` succeeds or not; `f`'s value is
/// returned unchanged.
pub async fn run_scoped<F, Fut, T>(config: McpServerConfig, f: F) -> Result<T, McpError>
where
    F: FnOnce(Arc<ToolBridge>) -> Fut,
    Fut: Future<Output = T>,
{
    let mut manager = McpServerManager::new(config);
    let bridge = manager.start().await?;
    let value = f(bridge).await;
    manager.stop().await;
    Ok(value)
}

/// Status of an MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// No process is running.
    Stopped,
    /// A session exists.
    Running {
        /// Session state.
        state: SessionState,
        /// Number of tools from the last discovery.
        tool_count: usize,
    },
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running { state, tool_count } => {
                write!(f, "{} ({} tools)", state, tool_count)
            }
        }
    }
}

//! Launch and protocol settings for one MCP server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{ClientInfo, MCP_PROTOCOL_VERSION};
use crate::transport::DEFAULT_SHUTDOWN_GRACE;

/// Configuration for an MCP server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Server name, used in logs.
    pub name: String,
    /// Command to execute.
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
    /// Identity sent in `initialize`.
    pub client_info: ClientInfo,
    /// Protocol version requested in `initialize`.
    pub protocol_version: String,
    /// Wait between SIGTERM and SIGKILL on shutdown.
    pub shutdown_grace: Duration,
    /// Per-request timeout; `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Prompt text placed ahead of the tool list in agent snapshots.
    pub base_prompt: String,
}

impl McpServerConfig {
    /// Create a new server configuration.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            client_info: ClientInfo::default(),
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            request_timeout: None,
            base_prompt: String::new(),
        }
    }

    /// Build a server configuration from the loaded application config.
    pub fn from_config(config: &tooldock_core::Config) -> Self {
        Self {
            name: config.server.name.clone(),
            command: config.server.command.clone(),
            args: config.server.args.clone(),
            env: config.server.env.clone(),
            working_dir: config.server.working_dir.clone(),
            client_info: ClientInfo {
                name: config.client.name.clone(),
                version: config.client.version.clone(),
            },
            protocol_version: config.client.protocol_version.clone(),
            shutdown_grace: Duration::from_millis(config.limits.shutdown_grace_ms),
            request_timeout: config.limits.request_timeout_secs.map(Duration::from_secs),
            base_prompt: config.agent.base_prompt.clone(),
        }
    }

    /// Add arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the base prompt for agent snapshots.
    pub fn with_base_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = McpServerConfig::new("tools", "python3")
            .with_args(vec!["mcp_server_stdio.py".to_string()])
            .with_env("TAVILY_API_KEY", "secret");

        assert_eq!(config.args, vec!["mcp_server_stdio.py"]);
        assert_eq!(config.env.get("TAVILY_API_KEY"), Some(&"secret".to_string()));
        assert_eq!(config.protocol_version, "2024-11-05");
        assert_eq!(config.shutdown_grace, Duration::from_millis(100));
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn test_from_app_config() {
        let mut app = tooldock_core::Config::default();
        app.server.name = "example-tools".to_string();
        app.server.command = "python3".to_string();
        app.client.name = "my-agent".to_string();
        app.limits.shutdown_grace_ms = 250;
        app.limits.request_timeout_secs = Some(30);
        app.agent.base_prompt = "Be brief.".to_string();

        let config = McpServerConfig::from_config(&app);
        assert_eq!(config.name, "example-tools");
        assert_eq!(config.command, "python3");
        assert_eq!(config.client_info.name, "my-agent");
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.base_prompt, "Be brief.");
    }
}

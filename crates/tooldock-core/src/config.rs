//! Configuration system for Tooldock.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Protocol revision advertised during the handshake.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Main configuration struct for Tooldock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity advertised to the tool server
    pub client: ClientConfig,
    /// The tool server to launch
    pub server: ServerConfig,
    /// Timing limits
    pub limits: LimitsConfig,
    /// Agent prompt settings
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client name sent in `clientInfo`
    pub name: String,
    /// Client version sent in `clientInfo`
    pub version: String,
    /// Protocol version requested in `initialize`
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "tooldock".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name of the server
    pub name: String,
    /// Executable to spawn
    pub command: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Environment overrides for the child process
    pub env: HashMap<String, String>,
    /// Working directory for the child process
    pub working_dir: Option<PathBuf>,
    /// Whether the server should be started at all
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Grace period between SIGTERM and SIGKILL on shutdown
    pub shutdown_grace_ms: u64,
    /// Per-request timeout; unset means wait forever
    pub request_timeout_secs: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 100,
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Prompt text placed ahead of the discovered tool list
    pub base_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_prompt: "You are a helpful assistant. Use the available tools when they \
                          help answer the user's request."
                .to_string(),
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "limits.shutdown_grace_ms")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Build the layered figment: defaults, user file, project files, env.
    ///
    /// `extra` is merged after the project files and before the environment,
    /// so an explicit `--config` file wins over everything but `TOOLDOCK_*`.
    pub fn figment(extra: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".tooldock/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".tooldock/config.local.toml"));

        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("TOOLDOCK_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Load configuration from a single TOML file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated(extra: Option<&Path>) -> Result<Self, Error> {
        let config: Config = Self::figment(extra)
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.check()
    }

    /// Validate an already-loaded configuration, logging warnings.
    pub fn check(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.client.name.is_empty() {
            result.add_error("client.name", "Client name cannot be empty");
        }

        if self.client.protocol_version.is_empty() {
            result.add_error("client.protocol_version", "Protocol version cannot be empty");
        } else if self.client.protocol_version != DEFAULT_PROTOCOL_VERSION {
            result.add_warning(
                "client.protocol_version",
                format!(
                    "Requesting protocol '{}'; servers are tested against '{}'",
                    self.client.protocol_version, DEFAULT_PROTOCOL_VERSION
                ),
            );
        }

        if self.server.enabled && self.server.command.trim().is_empty() {
            result.add_warning(
                "server.command",
                "No server command configured; pass --command on the command line",
            );
        }

        if let Some(ref dir) = self.server.working_dir {
            if !dir.is_dir() {
                result.add_error(
                    "server.working_dir",
                    format!("Working directory {:?} does not exist", dir),
                );
            }
        }

        if self.limits.shutdown_grace_ms > 30_000 {
            result.add_warning(
                "limits.shutdown_grace_ms",
                "Shutdown grace is very long (> 30s); stopping may appear to hang",
            );
        }

        if self.limits.request_timeout_secs == Some(0) {
            result.add_error(
                "limits.request_timeout_secs",
                "request_timeout_secs must be greater than 0 (omit it to disable timeouts)",
            );
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("tooldock"))
            .unwrap_or_else(|| PathBuf::from("~/.config/tooldock"))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
    }

    #[test]
    fn test_default_limits() {
        let config = Config::default();
        assert_eq!(config.limits.shutdown_grace_ms, 100);
        assert_eq!(config.limits.request_timeout_secs, None);
        assert_eq!(config.client.protocol_version, "2024-11-05");
    }

    #[test]
    fn test_missing_command_is_warning() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result.warnings().iter().any(|w| w.field == "server.command"));
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = Config::default();
        config.limits.request_timeout_secs = Some(0);
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result
            .errors()
            .iter()
            .any(|e| e.field == "limits.request_timeout_secs"));
        assert!(config.check().is_err());
    }

    #[test]
    fn test_missing_working_dir_is_error() {
        let mut config = Config::default();
        config.server.working_dir = Some(PathBuf::from("/definitely/not/a/real/dir"));
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "server.working_dir"));
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
command = "python3"
args = ["mcp_server_stdio.py"]

[server.env]
TAVILY_API_KEY = "test"

[limits]
request_timeout_secs = 30
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.command, "python3");
        assert_eq!(config.server.args, vec!["mcp_server_stdio.py"]);
        assert_eq!(config.server.env.get("TAVILY_API_KEY"), Some(&"test".to_string()));
        assert_eq!(config.limits.request_timeout_secs, Some(30));
        // Untouched sections keep their defaults
        assert_eq!(config.limits.shutdown_grace_ms, 100);
        assert_eq!(config.client.name, "tooldock");
    }

    #[test]
    fn test_to_toml_round_trips_through_from_file() {
        let mut config = Config::default();
        config.server.command = "mock-server".to_string();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.server.command, "mock-server");
    }
}

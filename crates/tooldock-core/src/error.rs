//! Error types for Tooldock.
//!
//! This module provides the top-level error type shared by the Tooldock
//! crates, with recovery suggestions for the errors a user can act on.

use thiserror::Error;

/// Result type alias using the Tooldock [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tooldock.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool server could not be started
    #[error("Failed to start tool server: {0}")]
    Startup(String),

    /// MCP protocol or transport error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// The tool server session was invalidated and must be restarted
    #[error("Session invalidated: {0}")]
    SessionInvalidated(String),

    /// Tool execution error
    #[error("Tool error: {0}")]
    Tool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => {
                Some("Check your config file at ~/.config/tooldock/config.toml")
            }
            Error::Startup(_) => Some(
                "Check that server.command points at an executable MCP server ('tooldock doctor')",
            ),
            Error::SessionInvalidated(_) => {
                Some("The server stream is out of sync; restart tooldock to reconnect")
            }
            Error::NotFound(_) => Some("Use 'tooldock tools' to see the available tools"),
            Error::Validation(_) => Some("Check the JSON passed with --args"),
            _ => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

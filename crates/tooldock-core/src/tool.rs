//! Agent-facing tool definitions and execution types.

use serde::{Deserialize, Serialize};

/// Definition of a tool available to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique identifier)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: serde_json::Value) -> Self {
        self.parameters = schema;
        self
    }
}

/// A request to call a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool arguments
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a tool call with a freshly generated ID.
    pub fn generate(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::new(format!("call_{}", uuid::Uuid::new_v4().simple()), name, arguments)
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this is responding to
    pub tool_call_id: String,
    /// Whether execution succeeded
    pub success: bool,
    /// Output content
    pub output: String,
    /// Error message if failed
    pub error: Option<String>,
    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            output: output.into(),
            error: None,
            duration_ms: 0,
        }
    }

    /// Create a failed result.
    pub fn error(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// The text an agent should see: the output, or the error message.
    pub fn content(&self) -> &str {
        match (&self.error, self.success) {
            (Some(error), false) => error,
            _ => &self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_call_ids_are_unique() {
        let a = ToolCall::generate("echo", json!({}));
        let b = ToolCall::generate("echo", json!({}));
        assert!(a.id.starts_with("call_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_result_content() {
        let ok = ToolResult::success("c1", "hi").with_duration(5);
        assert_eq!(ok.content(), "hi");
        assert_eq!(ok.duration_ms, 5);

        let failed = ToolResult::error("c2", "bad arg");
        assert!(!failed.success);
        assert_eq!(failed.content(), "bad arg");
    }

    #[test]
    fn test_definition_default_schema() {
        let def = ToolDefinition::new("date_tool", "Get the current date");
        assert_eq!(def.parameters["type"], "object");
    }
}

//! One-shot tool commands: list, call, prompt.

use serde_json::Value;

use tooldock_core::error::format_error_with_suggestion;
use tooldock_core::{Error, ToolCall, ToolResult};
use tooldock_mcp::{run_scoped, ToolDescriptor};

use super::mcp_error;
use crate::AppContext;

/// Print the server's tools.
pub async fn list(ctx: &AppContext, json: bool) -> anyhow::Result<()> {
    let config = ctx.server_config()?;
    let descriptors: Vec<ToolDescriptor> = run_scoped(config, |bridge| async move {
        bridge
            .snapshot()
            .stubs()
            .map(|stub| stub.descriptor.clone())
            .collect()
    })
    .await
    .map_err(mcp_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!("The server offers no tools.");
        return Ok(());
    }

    let width = descriptors.iter().map(|d| d.name.len()).max().unwrap_or(0);
    for descriptor in &descriptors {
        println!(
            "{:width$}  {}",
            descriptor.name,
            descriptor.description,
            width = width
        );
    }
    Ok(())
}

/// Call a tool once and print its output.
pub async fn call(ctx: &AppContext, name: &str, args: &str) -> anyhow::Result<()> {
    let arguments = parse_arguments(args).map_err(core_error)?;
    let config = ctx.server_config()?;
    let call = ToolCall::generate(name, arguments);

    let outcome: Result<ToolResult, Error> = run_scoped(config, |bridge| async move {
        if !bridge.snapshot().contains(&call.name) {
            return Err(Error::NotFound(format!("tool '{}'", call.name)));
        }
        bridge.execute(&call).await.map_err(Error::from)
    })
    .await
    .map_err(mcp_error)?;

    let result = outcome.map_err(core_error)?;
    tracing::debug!(tool = name, duration_ms = result.duration_ms, "Tool call finished");

    if result.success {
        println!("{}", result.output);
        Ok(())
    } else {
        Err(core_error(Error::Tool(result.content().to_string())))
    }
}

/// Print the system prompt an agent would get for the server's tools.
pub async fn prompt(ctx: &AppContext) -> anyhow::Result<()> {
    let config = ctx.server_config()?;
    let prompt = run_scoped(config, |bridge| async move { bridge.system_prompt() })
        .await
        .map_err(mcp_error)?;
    println!("{}", prompt);
    Ok(())
}

fn core_error(e: Error) -> anyhow::Error {
    anyhow::anyhow!("{}", format_error_with_suggestion(&e))
}

/// Parse `--args`: a JSON object, or nothing.
pub fn parse_arguments(raw: &str) -> Result<Value, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::Validation(format!("arguments are not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(Error::Validation(format!(
            "arguments must be a JSON object, got {}",
            value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(
            parse_arguments(r#"{"query": "rust"}"#).unwrap(),
            json!({"query": "rust"})
        );
    }

    #[test]
    fn test_parse_arguments_rejects_non_objects() {
        assert!(matches!(parse_arguments("[1, 2]"), Err(Error::Validation(_))));
        assert!(matches!(parse_arguments("{oops"), Err(Error::Validation(_))));
    }
}

//! Interactive tool shell.
//!
//! Provides a readline-style REPL with input history, slash commands, and
//! direct tool calls written as `<tool> [json arguments]`.

use std::path::PathBuf;
use std::sync::Arc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;

use tooldock_core::Error;
use tooldock_mcp::{McpError, McpServerManager, ToolBridge};

use super::mcp_error;
use super::tools::parse_arguments;
use crate::AppContext;

/// One parsed line of shell input.
#[derive(Debug, PartialEq)]
pub enum ShellInput {
    /// A `/command` with its arguments.
    Command { name: String, args: Vec<String> },
    /// A tool call.
    Call { tool: String, arguments: Value },
}

/// Result of command execution.
enum CommandResult {
    /// Continue the REPL loop
    Continue,
    /// Exit the REPL
    Exit,
    /// An error occurred
    Error(String),
}

/// Parse a non-empty, trimmed input line.
pub fn parse_line(line: &str) -> Result<ShellInput, Error> {
    if let Some(command) = line.strip_prefix('/') {
        let mut parts = command.split_whitespace().map(str::to_string);
        let name = parts.next().unwrap_or_default();
        return Ok(ShellInput::Command {
            name,
            args: parts.collect(),
        });
    }

    let (tool, rest) = match line.split_once(char::is_whitespace) {
        Some((tool, rest)) => (tool, rest),
        None => (line, ""),
    };
    Ok(ShellInput::Call {
        tool: tool.to_string(),
        arguments: parse_arguments(rest)?,
    })
}

/// Run the interactive shell.
pub async fn run(ctx: &AppContext) -> anyhow::Result<()> {
    let mut manager = McpServerManager::new(ctx.server_config()?);
    let mut bridge = manager.start().await.map_err(mcp_error)?;

    print_welcome_banner(ctx, &bridge);

    // Initialize readline editor
    let mut editor = DefaultEditor::new()?;

    // Load history if it exists
    let history_path = get_history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }

    // Main REPL loop
    loop {
        match editor.readline("tooldock> ") {
            Ok(line) => {
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }

                // Add to history
                let _ = editor.add_history_entry(line);

                let input = match parse_line(line) {
                    Ok(input) => input,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        continue;
                    }
                };

                match input {
                    ShellInput::Command { name, args } => {
                        match handle_command(&name, &args, &mut manager, &mut bridge).await {
                            CommandResult::Continue => {}
                            CommandResult::Exit => break,
                            CommandResult::Error(e) => eprintln!("Error: {}", e),
                        }
                    }
                    ShellInput::Call { tool, arguments } => {
                        if let Err(e) = call_tool(&tool, arguments, &mut manager, &mut bridge).await
                        {
                            eprintln!("Error: {}", e);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    manager.stop().await;

    // Save history
    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);

    Ok(())
}

/// Invoke a tool and print what the agent would see.
async fn call_tool(
    tool: &str,
    arguments: Value,
    manager: &mut McpServerManager,
    bridge: &mut Arc<ToolBridge>,
) -> anyhow::Result<()> {
    match bridge.invoke(tool, arguments).await {
        Ok(text) => println!("{}", text),
        Err(e @ McpError::ProtocolDesync { .. }) => {
            eprintln!("Error: {}", e);
            eprintln!("[Restarting server]");
            restart(manager, bridge).await?;
            return Ok(());
        }
        Err(e) => return Err(mcp_error(e)),
    }

    if let Some(summary) = bridge.refresh_if_changed().await.map_err(mcp_error)? {
        println!("[Tools changed: {}]", summary);
    }
    Ok(())
}

async fn restart(
    manager: &mut McpServerManager,
    bridge: &mut Arc<ToolBridge>,
) -> anyhow::Result<()> {
    manager.stop().await;
    *bridge = manager.start().await.map_err(mcp_error)?;
    println!("[{} tools available]", bridge.snapshot().len());
    Ok(())
}

/// Handle a slash command.
async fn handle_command(
    name: &str,
    args: &[String],
    manager: &mut McpServerManager,
    bridge: &mut Arc<ToolBridge>,
) -> CommandResult {
    match name {
        "help" | "h" | "?" => {
            print_help();
            CommandResult::Continue
        }
        "exit" | "quit" | "q" => {
            println!("Goodbye!");
            CommandResult::Exit
        }
        "clear" => {
            // Clear screen using ANSI escape codes
            print!("\x1B[2J\x1B[1;1H");
            CommandResult::Continue
        }
        "tools" => {
            let snapshot = bridge.snapshot();
            match args.first() {
                Some(tool) => match snapshot.get(tool) {
                    Some(stub) => {
                        println!("{}: {}", stub.name(), stub.descriptor.description);
                        match serde_json::to_string_pretty(&stub.descriptor.input_schema) {
                            Ok(schema) => println!("{}", schema),
                            Err(e) => return CommandResult::Error(e.to_string()),
                        }
                    }
                    None => return CommandResult::Error(format!("No tool named '{}'", tool)),
                },
                None => {
                    for stub in snapshot.stubs() {
                        println!("  {}  {}", stub.name(), stub.descriptor.description);
                    }
                }
            }
            CommandResult::Continue
        }
        "prompt" => {
            println!("{}", bridge.system_prompt());
            CommandResult::Continue
        }
        "refresh" => match bridge.refresh().await {
            Ok(summary) => {
                println!("[{}]", summary);
                CommandResult::Continue
            }
            Err(e) => CommandResult::Error(e.to_string()),
        },
        "status" => {
            println!("Server: {}", manager.config().name);
            println!("Status: {}", manager.status().await);
            CommandResult::Continue
        }
        "restart" => match restart(manager, bridge).await {
            Ok(()) => CommandResult::Continue,
            Err(e) => CommandResult::Error(e.to_string()),
        },
        _ => CommandResult::Error(format!(
            "Unknown command: /{}. Type /help for available commands.",
            name
        )),
    }
}

/// Print help information.
fn print_help() {
    println!("Available commands:");
    println!();
    println!("  <tool> [json]     Call a tool, e.g. echo {{\"text\": \"hi\"}}");
    println!("  /tools            List tools");
    println!("  /tools <name>     Show a tool's input schema");
    println!("  /prompt           Show the agent system prompt");
    println!("  /refresh          Rediscover tools");
    println!("  /status           Show server status");
    println!("  /restart          Restart the server");
    println!("  /clear            Clear the screen");
    println!("  /help, /h, /?     Show this help message");
    println!("  /exit, /quit, /q  Exit the shell");
    println!();
    println!("Tips:");
    println!("  - Press Ctrl+D to exit");
    println!("  - Use Up/Down arrows for command history");
}

/// Print the welcome banner.
fn print_welcome_banner(ctx: &AppContext, bridge: &ToolBridge) {
    println!("tooldock v{}", env!("CARGO_PKG_VERSION"));
    println!("Type /help for commands, or a tool name to call it.");
    println!("Press Ctrl+D to exit.");
    println!();
    println!(
        "[Server: {} | Tools: {}]",
        ctx.config.server.name,
        bridge.snapshot().len()
    );
    println!();
}

/// Get the path to the history file.
fn get_history_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tooldock")
        .join("shell_history.txt")
}

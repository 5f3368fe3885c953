//! # tooldock-cli
//!
//! Command-line interface for Tooldock.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tooldock_core::Config;
use tooldock_mcp::McpServerConfig;

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    /// Explicit config file, if one was given.
    pub config_file: Option<PathBuf>,
}

impl AppContext {
    /// Launch settings for the configured server.
    pub fn server_config(&self) -> anyhow::Result<McpServerConfig> {
        if !self.config.server.enabled {
            anyhow::bail!(
                "Server '{}' is disabled (set server.enabled = true)",
                self.config.server.name
            );
        }
        if self.config.server.command.trim().is_empty() {
            anyhow::bail!(
                "No server command configured. Set server.command in {} or pass --command.",
                Config::config_dir().join("config.toml").display()
            );
        }
        Ok(McpServerConfig::from_config(&self.config))
    }
}

/// Tooldock - call MCP server tools from the command line
#[derive(Parser)]
#[command(name = "tooldock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Extra configuration file, merged over the standard ones
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Server command, overriding server.command
    #[arg(long, value_name = "CMD", global = true)]
    command: Option<String>,

    /// Server argument, overriding server.args (repeatable)
    #[arg(long = "arg", value_name = "ARG", global = true, allow_hyphen_values = true)]
    args: Vec<String>,

    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the server's tools
    Tools {
        /// Print the raw descriptors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call one tool and print its result
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,
    },
    /// Print the agent system prompt for the server's tools
    Prompt,
    /// Interactive tool shell
    Shell,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Diagnose installation and server issues
    Doctor,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show where configuration is read from
    Path,
}

/// Apply `--command` and `--arg` over the configured server.
///
/// A new command drops the configured arguments.
fn apply_server_overrides(config: &mut Config, command: Option<String>, args: Vec<String>) {
    if let Some(command) = command {
        config.server.command = command;
        config.server.args = args;
    } else if !args.is_empty() {
        config.server.args = args;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so tool output on stdout stays clean
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let mut config = Config::load_validated(cli.config.as_deref()).map_err(|e| {
        anyhow::anyhow!("{}", tooldock_core::error::format_error_with_suggestion(&e))
    })?;

    apply_server_overrides(&mut config, cli.command, cli.args);

    let ctx = AppContext {
        config,
        config_file: cli.config,
    };

    match cli.subcommand {
        Commands::Tools { json } => commands::tools::list(&ctx, json).await?,
        Commands::Call { name, args } => commands::tools::call(&ctx, &name, &args).await?,
        Commands::Prompt => commands::tools::prompt(&ctx).await?,
        Commands::Shell => commands::shell::run(&ctx).await?,
        Commands::Config { action } => commands::config::handle(action, &ctx)?,
        Commands::Doctor => commands::doctor::run(&ctx).await?,
        Commands::Version => {
            println!("tooldock {}", env!("CARGO_PKG_VERSION"));
            println!("MCP protocol {}", tooldock_mcp::protocol::MCP_PROTOCOL_VERSION);
        }
    }

    Ok(())
}

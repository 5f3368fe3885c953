//! Diagnostic command to check installation and the configured server.

use std::time::Instant;

use tooldock_core::Config;
use tooldock_mcp::McpServerManager;

use crate::AppContext;

pub async fn run(ctx: &AppContext) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Check config directory
    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.join("config.toml").exists() {
        println!("  ✓ config.toml found");
    } else {
        println!("  ✗ No config.toml (defaults and environment are used)");
    }

    // Check configuration
    println!("\nConfiguration:");
    let validation = ctx.config.validate();
    if validation.issues.is_empty() {
        println!("  ✓ No issues");
    }
    for issue in validation.errors() {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }
    for issue in validation.warnings() {
        println!("  ! {}: {}", issue.field, issue.message);
    }

    // Check the server
    println!("\nServer '{}':", ctx.config.server.name);
    let config = match ctx.server_config() {
        Ok(config) => config,
        Err(e) => {
            println!("  ✗ {}", e);
            println!("\nDiagnostics complete.");
            return Ok(());
        }
    };
    println!("  Command: {} {}", config.command, config.args.join(" "));

    let mut manager = McpServerManager::new(config);
    let started = Instant::now();
    match manager.start().await {
        Ok(bridge) => {
            println!(
                "  ✓ Started and initialized in {} ms",
                started.elapsed().as_millis()
            );
            if let Some(pid) = manager.pid() {
                println!("  Process: {}", pid);
            }
            if let Some(session) = manager.session() {
                let session = session.lock().await;
                if let Some(info) = session.server_info() {
                    println!(
                        "  Server: {} {}",
                        info.name,
                        info.version.as_deref().unwrap_or("")
                    );
                }
            }
            let snapshot = bridge.snapshot();
            if snapshot.is_empty() {
                println!("  ✗ No tools offered");
            } else {
                println!("  ✓ {} tools: {}", snapshot.len(), snapshot.names().join(", "));
            }
        }
        Err(e) => {
            println!("  ✗ {}", e);
        }
    }
    manager.stop().await;

    println!("\nDiagnostics complete.");
    Ok(())
}

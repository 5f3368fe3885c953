//! Configuration management commands.

use std::path::PathBuf;

use tooldock_core::Config;

use crate::{AppContext, ConfigAction};

pub fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", ctx.config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("Configuration sources (later entries win):");
            for path in sources(ctx) {
                let marker = if path.exists() { "✓" } else { " " };
                println!("  {} {}", marker, path.display());
            }
            println!("    environment: TOOLDOCK_* (nested keys split on '__')");
        }
    }
    Ok(())
}

/// Config files in merge order.
fn sources(ctx: &AppContext) -> Vec<PathBuf> {
    let mut paths = vec![
        Config::config_dir().join("config.toml"),
        PathBuf::from(".tooldock/config.toml"),
        PathBuf::from(".tooldock/config.local.toml"),
    ];
    if let Some(ref extra) = ctx.config_file {
        paths.push(extra.clone());
    }
    paths
}

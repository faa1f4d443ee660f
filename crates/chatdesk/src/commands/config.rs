//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use chatdesk_config::{
    ChatdeskConfig, LoggingSection, RealtimeSection, ServerSection, StorageSection,
};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Show configuration file path
    Path,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./chatdesk.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(),
        ConfigCommand::Init { local, force } => cmd_init(local, force),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let sources = ctx.loaded.loaded_from();
    if sources.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        for path in sources {
            println!("# Loaded from {}", path.display());
        }
        println!();
    }

    print!("{}", resolved(&ctx.loaded.config).to_toml()?);
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    for (i, source) in ctx.loaded.sources.iter().enumerate() {
        let status = if source.loaded { "loaded" } else { "not found" };
        println!("{}. {} ({})", i + 1, source.path.display(), status);
    }
    Ok(())
}

fn cmd_path() -> Result<()> {
    match chatdesk_config::xdg_config_path() {
        Some(path) => println!("{}", path.display()),
        None => anyhow::bail!("could not determine a config directory"),
    }
    Ok(())
}

fn cmd_init(local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("chatdesk.toml")
    } else {
        chatdesk_config::xdg_config_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine a config directory"))?
    };

    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    chatdesk_config::save_config(&resolved(&ChatdeskConfig::default()), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Every section filled in, so the printed file documents all options.
fn resolved(config: &ChatdeskConfig) -> ChatdeskConfig {
    ChatdeskConfig {
        server: Some(config.server.clone().unwrap_or_else(ServerSection::default)),
        storage: Some(config.storage.clone().unwrap_or_else(StorageSection::default)),
        realtime: Some(config.realtime.clone().unwrap_or_else(RealtimeSection::default)),
        logging: Some(config.logging.clone().unwrap_or_else(LoggingSection::default)),
    }
}

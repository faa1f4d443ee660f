//! CLI command handlers.

pub mod config;
pub mod start;

use std::path::Path;

use anyhow::Result;
use chatdesk_config::LoadedConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Configuration resolved at startup.
    pub loaded: LoadedConfig,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Load an explicit config file, or discover and merge the usual layers.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let loaded = match explicit {
        Some(path) => LoadedConfig::from_file(path)?,
        None => chatdesk_config::load_config(None)?,
    };
    Ok(loaded)
}

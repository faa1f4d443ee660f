//! Configuration system for the chatdesk routing server.
//!
//! Provides TOML-based configuration with:
//! - Optional `[server]`, `[storage]`, `[realtime]` and `[logging]` sections
//! - Config file layering (XDG user config + project-local overrides)
//! - Defaults shared with the server's runtime config

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;

//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [server]      # listener and WebSocket limits
//! [storage]     # database location
//! [realtime]    # typing window, message limits
//! [logging]     # log file output
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Built-in defaults shared by the file config and the server runtime config.
pub mod defaults {
    pub const BIND: &str = "127.0.0.1";
    pub const PORT: u16 = 8080;
    /// 1 MiB.
    pub const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;
    pub const IDLE_TIMEOUT_SECS: u64 = 5 * 60;
    pub const TYPING_TIMEOUT_MS: u64 = 3_000;
    pub const MAX_MESSAGE_LENGTH: usize = 5_000;
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatdeskConfig {
    pub server: Option<ServerSection>,
    pub storage: Option<StorageSection>,
    pub realtime: Option<RealtimeSection>,
    pub logging: Option<LoggingSection>,
}

impl ChatdeskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: ChatdeskConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.realtime.is_some() {
            self.realtime = other.realtime;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    pub fn storage(&self) -> StorageSection {
        self.storage.clone().unwrap_or_default()
    }

    pub fn realtime(&self) -> RealtimeSection {
        self.realtime.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if let Some(ref realtime) = self.realtime {
            if realtime.typing_timeout_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: "realtime.typing_timeout_ms".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            if realtime.max_message_length == 0 {
                return Err(ConfigError::Invalid {
                    field: "realtime.max_message_length".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if let Some(ref server) = self.server
            && server.idle_timeout_secs == 0
        {
            return Err(ConfigError::Invalid {
                field: "server.idle_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// CORS allowed origins (empty = no CORS layer).
    pub cors_origins: Vec<String>,
    /// Largest accepted WebSocket frame, in bytes.
    pub max_ws_message_size: usize,
    /// Close sockets that stay silent this long.
    pub idle_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: defaults::BIND.to_string(),
            port: defaults::PORT,
            cors_origins: Vec::new(),
            max_ws_message_size: defaults::MAX_WS_MESSAGE_SIZE,
            idle_timeout_secs: defaults::IDLE_TIMEOUT_SECS,
        }
    }
}

/// Storage configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite database file. When unset the server keeps everything in memory.
    pub database: Option<PathBuf>,
}

/// Real-time behaviour tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    /// Quiet interval after which a typing indicator is withdrawn.
    pub typing_timeout_ms: u64,
    /// Maximum characters in a chat message.
    pub max_message_length: usize,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            typing_timeout_ms: defaults::TYPING_TIMEOUT_MS,
            max_message_length: defaults::MAX_MESSAGE_LENGTH,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Console filter directive, e.g. `"info"` or `"chatdesk_server=debug,info"`.
    pub level: Option<String>,
    /// Write a rotating JSON log file alongside console output.
    pub json_file: bool,
    /// Directory for log files (defaults to `<config dir>/logs`).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: None,
            json_file: true,
            directory: None,
        }
    }
}

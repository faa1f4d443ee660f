//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use chatdesk_config::{ChatdeskConfig, defaults};

use crate::error::{Result, ServerError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// CORS allowed origins (empty = no CORS).
    pub cors_origins: Vec<String>,

    /// Maximum WebSocket message size in bytes.
    /// Larger frames are answered with `message:error` and dropped. Default: 1 MB.
    pub max_ws_message_size: usize,

    /// Connections that receive nothing for this long are closed.
    pub idle_timeout: Duration,

    /// Quiet interval after the last typing signal before `typing:stop` fires.
    pub typing_timeout: Duration,

    /// Maximum characters in a chat message body.
    pub max_message_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], defaults::PORT)),
            cors_origins: Vec::new(),
            max_ws_message_size: defaults::MAX_WS_MESSAGE_SIZE,
            idle_timeout: Duration::from_secs(defaults::IDLE_TIMEOUT_SECS),
            typing_timeout: Duration::from_millis(defaults::TYPING_TIMEOUT_MS),
            max_message_length: defaults::MAX_MESSAGE_LENGTH,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the runtime config from a loaded file config.
    pub fn from_file_config(config: &ChatdeskConfig) -> Result<Self> {
        let server = config.server();
        let realtime = config.realtime();

        let addr = format!("{}:{}", server.bind, server.port);
        let bind_address = addr
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{addr}': {e}")))?;

        Ok(Self {
            bind_address,
            cors_origins: server.cors_origins,
            max_ws_message_size: server.max_ws_message_size,
            idle_timeout: Duration::from_secs(server.idle_timeout_secs),
            typing_timeout: Duration::from_millis(realtime.typing_timeout_ms),
            max_message_length: realtime.max_message_length,
        })
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set CORS allowed origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Set the maximum WebSocket message size.
    pub fn with_max_ws_message_size(mut self, size: usize) -> Self {
        self.max_ws_message_size = size;
        self
    }

    /// Set the idle timeout for WebSocket connections.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the typing indicator quiet interval.
    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }

    /// Set the maximum chat message length.
    pub fn with_max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_file_defaults() {
        let from_file = ServerConfig::from_file_config(&ChatdeskConfig::default()).unwrap();
        let config = ServerConfig::default();

        assert_eq!(from_file.bind_address, config.bind_address);
        assert_eq!(config.typing_timeout, Duration::from_millis(3_000));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.max_message_length, 5_000);
    }

    #[test]
    fn test_from_file_config_reads_sections() {
        let file = ChatdeskConfig::from_toml(
            r#"
[server]
bind = "0.0.0.0"
port = 9100
cors_origins = ["https://support.example.com"]

[realtime]
typing_timeout_ms = 1500
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file_config(&file).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:9100");
        assert_eq!(config.cors_origins.len(), 1);
        assert_eq!(config.typing_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_bind_is_config_error() {
        let file = ChatdeskConfig::from_toml("[server]\nbind = \"not an address\"\n").unwrap();
        let err = ServerConfig::from_file_config(&file).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .with_bind_address("0.0.0.0:9000".parse().unwrap())
            .with_typing_timeout(Duration::from_millis(500))
            .with_max_message_length(10)
            .with_idle_timeout(Duration::from_secs(1));

        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.typing_timeout, Duration::from_millis(500));
        assert_eq!(config.max_message_length, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(1));
    }
}

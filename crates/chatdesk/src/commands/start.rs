//! Start command - launches the chatdesk server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use chatdesk_config::{ChatdeskConfig, ServerSection, StorageSection};
use chatdesk_server::{Server, ServerConfig};
use chatdesk_store::{InMemoryStore, SharedStore, SqliteStore};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// SQLite database file (overrides config)
    #[arg(long, env = "CHATDESK_DATABASE")]
    pub database: Option<PathBuf>,

    /// Keep all state in memory, ignoring any configured database
    #[arg(long, conflicts_with = "database")]
    pub in_memory: bool,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let config = apply_overrides(ctx.loaded.config.clone(), &args);

    if ctx.verbose {
        for path in ctx.loaded.loaded_from() {
            println!("Config: {}", path.display());
        }
    }

    let server_config = ServerConfig::from_file_config(&config)?;
    let store = open_store(&config.storage(), args.in_memory)?;

    let server = Server::new(store, server_config);
    let addr = server.bind_address();

    println!("chatdesk server starting on http://{}", addr);
    println!("WebSocket endpoint: ws://{}/ws", addr);
    println!("Press Ctrl+C to stop");

    server.run_until(addr, shutdown_signal()).await?;
    Ok(())
}

/// Layer command-line flags over the file configuration.
fn apply_overrides(mut config: ChatdeskConfig, args: &StartArgs) -> ChatdeskConfig {
    if args.bind.is_some() || args.port.is_some() {
        let current = config.server();
        config.server = Some(ServerSection {
            bind: args.bind.clone().unwrap_or(current.bind.clone()),
            port: args.port.unwrap_or(current.port),
            ..current
        });
    }
    if let Some(ref database) = args.database {
        config.storage = Some(StorageSection {
            database: Some(database.clone()),
        });
    }
    config
}

fn open_store(storage: &StorageSection, in_memory: bool) -> Result<SharedStore> {
    match storage.database {
        Some(ref path) if !in_memory => {
            tracing::info!(path = %path.display(), "Using SQLite conversation store");
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        _ => {
            tracing::warn!("No database configured; conversations will not survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_keep_file_config() {
        let mut file = ChatdeskConfig::default();
        file.server = Some(ServerSection {
            port: 9000,
            ..Default::default()
        });

        let config = apply_overrides(file.clone(), &StartArgs::default());
        assert_eq!(config, file);
    }

    #[test]
    fn test_port_flag_keeps_other_server_fields() {
        let mut file = ChatdeskConfig::default();
        file.server = Some(ServerSection {
            bind: "0.0.0.0".to_string(),
            cors_origins: vec!["https://example.com".to_string()],
            ..Default::default()
        });
        let args = StartArgs {
            port: Some(7000),
            ..Default::default()
        };

        let server = apply_overrides(file, &args).server();
        assert_eq!(server.port, 7000);
        assert_eq!(server.bind, "0.0.0.0");
        assert_eq!(server.cors_origins, vec!["https://example.com".to_string()]);
    }

    #[test]
    fn test_database_flag_sets_storage() {
        let args = StartArgs {
            database: Some(PathBuf::from("/tmp/chatdesk.db")),
            ..Default::default()
        };
        let config = apply_overrides(ChatdeskConfig::default(), &args);
        assert_eq!(
            config.storage().database,
            Some(PathBuf::from("/tmp/chatdesk.db"))
        );
    }

    #[test]
    fn test_in_memory_ignores_configured_database() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageSection {
            database: Some(dir.path().join("never-created.db")),
        };

        open_store(&storage, true).unwrap();
        assert!(!dir.path().join("never-created.db").exists());
    }

    #[test]
    fn test_sqlite_store_is_opened_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("chatdesk.db");
        let storage = StorageSection {
            database: Some(path.clone()),
        };

        open_store(&storage, false).unwrap();
        assert!(path.exists());
    }
}

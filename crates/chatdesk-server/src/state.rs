//! Application state shared across handlers.

use std::sync::Arc;

use chatdesk_store::SharedStore;

use crate::config::ServerConfig;
use crate::realtime::Realtime;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Persistence backend.
    pub store: SharedStore,

    /// Registry, rooms, presence, typing and the message pipeline.
    pub realtime: Arc<Realtime>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(store: SharedStore, config: ServerConfig) -> Self {
        let realtime = Realtime::new(Arc::clone(&store), &config);
        Self {
            config: Arc::new(config),
            store,
            realtime: Arc::new(realtime),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn realtime(&self) -> &Realtime {
        &self.realtime
    }
}

//! Agent presence.
//!
//! The broadcast is optimistic: every connection hears about the change
//! immediately while the durable `isOnline`/`lastSeen` write runs in the
//! background and may fail without consequence.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use chatdesk_store::{ConversationStore, SharedStore};

use super::best_effort;
use super::rooms::RoomRouter;
use crate::routes::ws::{AgentStatus, ServerEvent};

pub struct PresenceTracker {
    store: SharedStore,
    rooms: Arc<RoomRouter>,
}

impl PresenceTracker {
    pub fn new(store: SharedStore, rooms: Arc<RoomRouter>) -> Self {
        Self { store, rooms }
    }

    pub fn set_online(&self, agent_id: &str) -> JoinHandle<Option<()>> {
        self.update(agent_id, true)
    }

    pub fn set_offline(&self, agent_id: &str) -> JoinHandle<Option<()>> {
        self.update(agent_id, false)
    }

    fn update(&self, agent_id: &str, is_online: bool) -> JoinHandle<Option<()>> {
        let last_seen = Utc::now();

        let store = Arc::clone(&self.store);
        let id = agent_id.to_string();
        let persist = best_effort::spawn("persist agent presence", async move {
            store.set_agent_presence(&id, is_online, last_seen).await
        });

        let delivered = self.rooms.broadcast_all(ServerEvent::AgentStatus(AgentStatus {
            agent_id: agent_id.to_string(),
            is_online,
            last_seen,
        }));
        tracing::debug!(agent_id, is_online, delivered, "Agent presence changed");

        persist
    }
}

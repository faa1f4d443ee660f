//! The real-time core: connection registry, rooms, presence, typing and the
//! message pipeline, owned together by one [`Realtime`] coordinator.
//!
//! State here is process-local. Running several server processes would need
//! an external pub/sub layer for rooms and a shared store for the registry.

pub mod best_effort;
pub mod listing;
pub mod locks;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod resolver;
pub mod rooms;
pub mod typing;

use std::sync::Arc;

use chatdesk_store::{SharedStore, UserType};

use crate::config::ServerConfig;

pub use locks::{KeyedGuard, KeyedLocks};
pub use pipeline::MessagePipeline;
pub use presence::PresenceTracker;
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use resolver::{ConversationResolver, CustomerIdentity, Resolution};
pub use rooms::{Outbox, Room, RoomRouter};
pub use typing::TypingCoordinator;

/// Created once at server start and shared by every connection task.
pub struct Realtime {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRouter>,
    presence: PresenceTracker,
    typing: TypingCoordinator,
    pipeline: MessagePipeline,
    max_message_length: usize,
}

impl Realtime {
    pub fn new(store: SharedStore, config: &ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomRouter::new());
        Self {
            presence: PresenceTracker::new(Arc::clone(&store), Arc::clone(&rooms)),
            typing: TypingCoordinator::new(Arc::clone(&rooms), config.typing_timeout),
            pipeline: MessagePipeline::new(store, Arc::clone(&rooms), Arc::clone(&registry)),
            registry,
            rooms,
            max_message_length: config.max_message_length,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomRouter {
        &self.rooms
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Make a new socket reachable through its outbox.
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::new();
        self.rooms.attach(id, outbox);
        id
    }

    /// Tear down everything a socket left behind.
    ///
    /// Safe to call for connections that never registered or were already removed.
    pub fn disconnect(&self, id: ConnectionId) {
        let entry = self.registry.remove(id);
        let cancelled = self.typing.cancel_connection(id);
        self.rooms.detach(id);

        if let Some(connection) = entry {
            tracing::debug!(
                connection_id = %id,
                user_id = %connection.user_id,
                user_type = %connection.user_type,
                cancelled_typing = cancelled,
                "Connection unregistered"
            );
            // An agent stays online while another of their sockets is registered.
            if connection.user_type == UserType::Agent
                && !self.registry.has_user(&connection.user_id, UserType::Agent)
            {
                self.presence.set_offline(&connection.user_id);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::{ConnectionId, RoomRouter};
    use crate::routes::ws::ServerEvent;

    /// Attach a fresh connection and return its receiving end.
    pub fn attach(rooms: &RoomRouter) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        rooms.attach(id, tx);
        (id, rx)
    }

    /// Everything queued so far.
    pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn event_names(events: &[ServerEvent]) -> Vec<&'static str> {
        events.iter().map(ServerEvent::name).collect()
    }

    pub fn events_named(events: &[ServerEvent], name: &str) -> usize {
        events.iter().filter(|e| e.name() == name).count()
    }
}

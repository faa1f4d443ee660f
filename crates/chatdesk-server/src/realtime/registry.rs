//! Connection registry: who each live socket represents.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use uuid::Uuid;

use chatdesk_store::UserType;

/// Unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity a socket registered with through a `*:join` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub user_type: UserType,
    pub conversation_id: Option<String>,
}

/// In-memory map of registered connections.
///
/// Sockets that never sent a join event are not listed here. Operations on
/// unknown ids are no-ops.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-register a connection.
    pub fn register(
        &self,
        id: ConnectionId,
        user_id: impl Into<String>,
        user_type: UserType,
        conversation_id: Option<String>,
    ) {
        let connection = Connection {
            id,
            user_id: user_id.into(),
            user_type,
            conversation_id,
        };
        self.entries.lock().insert(id, connection);
    }

    /// Record the conversation a connection resolved into after registering.
    pub fn attach_conversation(&self, id: ConnectionId, conversation_id: impl Into<String>) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.conversation_id = Some(conversation_id.into());
        }
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Connection> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.entries.lock().remove(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any registered connection still represents this user.
    pub fn has_user(&self, user_id: &str, user_type: UserType) -> bool {
        self.entries
            .lock()
            .values()
            .any(|c| c.user_type == user_type && c.user_id == user_id)
    }

    /// Distinct agents with at least one registered connection.
    pub fn connected_agents(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|c| c.user_type == UserType::Agent)
            .map(|c| c.user_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_remove() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();

        registry.register(id, "c1", UserType::Customer, None);
        let entry = registry.lookup(id).unwrap();
        assert_eq!(entry.user_id, "c1");
        assert_eq!(entry.conversation_id, None);

        registry.attach_conversation(id, "conv-1");
        assert_eq!(registry.lookup(id).unwrap().conversation_id.as_deref(), Some("conv-1"));

        assert!(registry.remove(id).is_some());
        assert!(registry.lookup(id).is_none());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        registry.attach_conversation(id, "conv-1");
        assert!(registry.lookup(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_connected_agents_counts_distinct_ids() {
        let registry = ConnectionRegistry::new();
        registry.register(ConnectionId::new(), "a1", UserType::Agent, None);
        registry.register(ConnectionId::new(), "a1", UserType::Agent, Some("conv-1".into()));
        registry.register(ConnectionId::new(), "a2", UserType::Agent, None);
        registry.register(ConnectionId::new(), "c1", UserType::Customer, None);

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.connected_agents(), 2);
    }

    #[test]
    fn test_has_user_matches_id_and_type() {
        let registry = ConnectionRegistry::new();
        let tab = ConnectionId::new();
        registry.register(tab, "a1", UserType::Agent, None);
        registry.register(ConnectionId::new(), "c1", UserType::Customer, None);

        assert!(registry.has_user("a1", UserType::Agent));
        assert!(!registry.has_user("a1", UserType::Customer));
        assert!(!registry.has_user("c1", UserType::Agent));

        registry.remove(tab);
        assert!(!registry.has_user("a1", UserType::Agent));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
        assert!(!ConnectionId::default().to_string().is_empty());
    }
}

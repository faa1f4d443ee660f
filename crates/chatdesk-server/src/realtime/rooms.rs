//! Room membership and fan-out.
//!
//! Every socket attaches an outbox (the sending half of its writer channel).
//! Broadcasting only pushes onto outboxes, so a slow client never stalls the
//! sender. Pushes for one broadcast happen under a single lock, which keeps the
//! relative order of two broadcasts identical for every member.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::registry::ConnectionId;
use crate::routes::ws::ServerEvent;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// A named broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Everyone viewing one conversation.
    Conversation(String),
    /// Every agent dashboard.
    Agents,
    /// One customer across tabs and reconnects.
    Customer(String),
    /// One agent's personal channel.
    Agent(String),
}

impl Room {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self::Conversation(id.into())
    }

    pub fn customer(id: impl Into<String>) -> Self {
        Self::Customer(id.into())
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Conversation(id) => write!(f, "conversation:{id}"),
            Room::Agents => f.write_str("agents"),
            Room::Customer(id) => write!(f, "customer:{id}"),
            Room::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

#[derive(Debug, Default)]
struct RouterState {
    outboxes: HashMap<ConnectionId, Outbox>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<Room>>,
}

impl RouterState {
    fn deliver(&self, id: &ConnectionId, event: &ServerEvent) -> bool {
        match self.outboxes.get(id) {
            Some(outbox) => outbox.send(event.clone()).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct RoomRouter {
    state: Mutex<RouterState>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a connection reachable. Replaces any previous outbox.
    pub fn attach(&self, id: ConnectionId, outbox: Outbox) {
        self.state.lock().outboxes.insert(id, outbox);
    }

    /// Drop a connection's outbox and every room membership it holds.
    pub fn detach(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        state.outboxes.remove(&id);
        let Some(rooms) = state.memberships.remove(&id) else {
            return;
        };
        for room in rooms {
            if let Some(members) = state.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    state.rooms.remove(&room);
                }
            }
        }
    }

    /// Add a connection to a room. Ignored for connections that are not attached.
    pub fn join(&self, id: ConnectionId, room: Room) {
        let mut state = self.state.lock();
        if !state.outboxes.contains_key(&id) {
            return;
        }
        state.memberships.entry(id).or_default().insert(room.clone());
        state.rooms.entry(room).or_default().insert(id);
    }

    pub fn leave(&self, id: ConnectionId, room: &Room) {
        let mut state = self.state.lock();
        if let Some(rooms) = state.memberships.get_mut(&id) {
            rooms.remove(room);
        }
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    pub fn is_member(&self, id: ConnectionId, room: &Room) -> bool {
        self.state
            .lock()
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&id))
    }

    pub fn member_count(&self, room: &Room) -> usize {
        self.state.lock().rooms.get(room).map_or(0, HashSet::len)
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().outboxes.len()
    }

    /// Send to one connection. Returns whether the event was queued.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        self.state.lock().deliver(&id, &event)
    }

    /// Send to every member of a room. Returns the number of recipients.
    pub fn broadcast(&self, room: &Room, event: ServerEvent) -> usize {
        self.broadcast_many(&[room.clone()], None, event)
    }

    /// Send to every member of a room except one connection.
    pub fn broadcast_except(&self, room: &Room, except: ConnectionId, event: ServerEvent) -> usize {
        self.broadcast_many(&[room.clone()], Some(except), event)
    }

    /// Send once to every connection that is a member of any of `rooms`.
    pub fn broadcast_many(
        &self,
        rooms: &[Room],
        except: Option<ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let state = self.state.lock();
        let mut seen = HashSet::new();
        let mut delivered = 0;
        for room in rooms {
            let Some(members) = state.rooms.get(room) else {
                continue;
            };
            for id in members {
                if Some(*id) == except || !seen.insert(*id) {
                    continue;
                }
                if state.deliver(id, &event) {
                    delivered += 1;
                }
            }
        }
        tracing::trace!(event = event.name(), delivered, "Broadcast");
        delivered
    }

    /// Send to every attached connection, joined to a room or not.
    pub fn broadcast_all(&self, event: ServerEvent) -> usize {
        let state = self.state.lock();
        state
            .outboxes
            .values()
            .filter(|outbox| outbox.send(event.clone()).is_ok())
            .count()
    }
}

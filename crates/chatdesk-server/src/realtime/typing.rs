//! Typing indicators.
//!
//! One session per `(conversation, sender)`. The first signal broadcasts
//! `typing:start`; later signals only push the expiry back. When the quiet
//! interval elapses `typing:stop` is broadcast and the session ends. Neither
//! event reaches the sender's own socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::registry::ConnectionId;
use super::rooms::{Room, RoomRouter};
use crate::routes::ws::{ServerEvent, TypingSignal};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TypingKey {
    conversation_id: String,
    sender_id: String,
}

struct TypingSession {
    connection: ConnectionId,
    generation: u64,
    cancel: CancellationToken,
}

type Sessions = Arc<Mutex<HashMap<TypingKey, TypingSession>>>;

pub struct TypingCoordinator {
    rooms: Arc<RoomRouter>,
    timeout: Duration,
    sessions: Sessions,
    next_generation: AtomicU64,
}

impl TypingCoordinator {
    pub fn new(rooms: Arc<RoomRouter>, timeout: Duration) -> Self {
        Self {
            rooms,
            timeout,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn on_typing_signal(&self, connection: ConnectionId, signal: TypingSignal) {
        let key = TypingKey {
            conversation_id: signal.conversation_id.clone(),
            sender_id: signal.sender_id.clone(),
        };
        let room = Room::conversation(&signal.conversation_id);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        // Broadcasts happen under the sessions lock so a start can never
        // overtake the stop of the previous session.
        {
            let mut sessions = self.sessions.lock();
            let previous = sessions.insert(
                key.clone(),
                TypingSession {
                    connection,
                    generation,
                    cancel: cancel.clone(),
                },
            );
            match previous {
                Some(session) => session.cancel.cancel(),
                None => {
                    self.rooms.broadcast_except(
                        &room,
                        connection,
                        ServerEvent::TypingStart(signal.clone()),
                    );
                }
            }
        }

        let sessions = Arc::clone(&self.sessions);
        let rooms = Arc::clone(&self.rooms);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let mut sessions = sessions.lock();
                    let current = sessions
                        .get(&key)
                        .is_some_and(|session| session.generation == generation);
                    if current {
                        sessions.remove(&key);
                        rooms.broadcast_except(&room, connection, ServerEvent::TypingStop(signal));
                    }
                }
            }
        });
    }

    /// Cancel every timer armed by `connection` without broadcasting a stop.
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| {
            if session.connection == connection {
                session.cancel.cancel();
                false
            } else {
                true
            }
        });
        before - sessions.len()
    }

    /// Number of armed typing sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::test_support::{attach, drain, event_names};
    use chatdesk_store::UserType;

    const TIMEOUT: Duration = Duration::from_millis(3_000);

    fn signal() -> TypingSignal {
        TypingSignal {
            conversation_id: "conv-1".to_string(),
            sender_id: "c1".to_string(),
            sender_type: UserType::Customer,
        }
    }

    struct Fixture {
        typing: TypingCoordinator,
        sender: ConnectionId,
        sender_rx: tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
        observer_rx: tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
    }

    fn fixture() -> Fixture {
        let rooms = Arc::new(RoomRouter::new());
        let (sender, sender_rx) = attach(&rooms);
        let (observer, observer_rx) = attach(&rooms);
        rooms.join(sender, Room::conversation("conv-1"));
        rooms.join(observer, Room::conversation("conv-1"));
        Fixture {
            typing: TypingCoordinator::new(rooms, TIMEOUT),
            sender,
            sender_rx,
            observer_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_signal_starts_then_stops() {
        let mut f = fixture();

        f.typing.on_typing_signal(f.sender, signal());
        assert_eq!(event_names(&drain(&mut f.observer_rx)), vec!["typing:start"]);

        tokio::time::sleep(Duration::from_millis(3_100)).await;

        assert_eq!(event_names(&drain(&mut f.observer_rx)), vec!["typing:stop"]);
        assert!(drain(&mut f.sender_rx).is_empty());
        assert_eq!(f.typing.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_from_last_signal() {
        let mut f = fixture();

        f.typing.on_typing_signal(f.sender, signal());
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        f.typing.on_typing_signal(f.sender, signal());

        // 3.1s after the first signal the indicator is still up.
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(event_names(&drain(&mut f.observer_rx)), vec!["typing:start"]);
        assert_eq!(f.typing.active_sessions(), 1);

        // 3.1s after the second signal it has stopped, exactly once.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(event_names(&drain(&mut f.observer_rx)), vec!["typing:stop"]);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert!(drain(&mut f.observer_rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_senders_are_independent() {
        let mut f = fixture();
        let agent_signal = TypingSignal {
            sender_id: "a1".to_string(),
            sender_type: UserType::Agent,
            ..signal()
        };

        f.typing.on_typing_signal(f.sender, signal());
        f.typing.on_typing_signal(f.sender, agent_signal);
        assert_eq!(f.typing.active_sessions(), 2);

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(
            event_names(&drain(&mut f.observer_rx)),
            vec!["typing:start", "typing:start", "typing:stop", "typing:stop"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_without_stop() {
        let mut f = fixture();

        f.typing.on_typing_signal(f.sender, signal());
        assert_eq!(f.typing.cancel_connection(f.sender), 1);
        assert_eq!(f.typing.cancel_connection(f.sender), 0);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(event_names(&drain(&mut f.observer_rx)), vec!["typing:start"]);
        assert_eq!(f.typing.active_sessions(), 0);
    }
}

//! WebSocket event handlers.
//!
//! [`handle_frame`] is the failure boundary for one inbound frame: parse and
//! validation errors, handler errors and handler panics all become a
//! `message:error` for the originating connection.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;

use chatdesk_store::{ConversationStore, UserType};

use super::protocol::{
    AgentJoin, AgentPresence, ClientEvent, CustomerJoin, ServerEvent, TypingSignal,
};
use crate::error::{Result, ServerError};
use crate::realtime::{ConnectionId, Room};
use crate::state::AppState;

/// Response from handling a frame, queued to the originating connection.
#[derive(Debug)]
pub enum MessageResponse {
    /// Send a single event.
    Single(ServerEvent),
    /// No response needed.
    None,
}

impl MessageResponse {
    fn error(temp_id: Option<String>, err: &ServerError) -> Self {
        Self::Single(ServerEvent::message_error(temp_id, err.to_string()))
    }
}

/// Parse, validate and dispatch one text frame.
pub async fn handle_frame(text: &str, conn_id: ConnectionId, state: &AppState) -> MessageResponse {
    // Two phases so the correlation id survives a schema mismatch.
    let raw: Value = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            return MessageResponse::error(
                None,
                &ServerError::Validation(format!("invalid JSON: {e}")),
            );
        }
    };
    let raw_temp_id = raw
        .pointer("/data/tempId")
        .and_then(Value::as_str)
        .map(String::from);

    let event: ClientEvent = match serde_json::from_value(raw) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(connection_id = %conn_id, error = %e, "Rejected malformed event");
            return MessageResponse::error(
                raw_temp_id,
                &ServerError::Validation(format!("invalid event: {e}")),
            );
        }
    };

    let temp_id = event.temp_id().map(String::from);
    if let Err(e) = event.validate(state.realtime().max_message_length()) {
        tracing::debug!(connection_id = %conn_id, event = event.name(), error = %e, "Rejected invalid event");
        return MessageResponse::error(temp_id, &e.into());
    }

    let name = event.name();
    match AssertUnwindSafe(handle_event(event, conn_id, state))
        .catch_unwind()
        .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            if err.is_client_error() {
                tracing::debug!(connection_id = %conn_id, event = name, error = %err, "Event rejected");
            } else {
                tracing::warn!(connection_id = %conn_id, event = name, error = %err, "Event failed");
            }
            MessageResponse::error(temp_id, &err)
        }
        Err(_) => {
            tracing::error!(connection_id = %conn_id, event = name, "Event handler panicked");
            MessageResponse::error(
                temp_id,
                &ServerError::Internal("event handler failed".to_string()),
            )
        }
    }
}

/// Handle a validated client event.
pub async fn handle_event(
    event: ClientEvent,
    conn_id: ConnectionId,
    state: &AppState,
) -> Result<MessageResponse> {
    let realtime = state.realtime();
    match event {
        ClientEvent::Ping => Ok(MessageResponse::Single(ServerEvent::Pong)),

        ClientEvent::CustomerJoin(join) => {
            handle_customer_join(join, conn_id, state).await?;
            Ok(MessageResponse::None)
        }

        ClientEvent::AgentJoin(join) => {
            handle_agent_join(join, conn_id, state);
            Ok(MessageResponse::None)
        }

        ClientEvent::CustomerMessage(msg) => {
            realtime
                .pipeline()
                .handle_customer_message(conn_id, msg)
                .await?;
            Ok(MessageResponse::None)
        }

        ClientEvent::AgentMessage(msg) => {
            realtime.pipeline().handle_agent_message(conn_id, msg).await?;
            Ok(MessageResponse::None)
        }

        ClientEvent::CustomerTyping(signal) | ClientEvent::AgentTyping(signal) => {
            handle_typing(signal, conn_id, state);
            Ok(MessageResponse::None)
        }

        ClientEvent::AgentOnline(presence) => {
            handle_agent_online(presence, conn_id, state);
            Ok(MessageResponse::None)
        }

        ClientEvent::AgentOffline(presence) => {
            realtime.presence().set_offline(&presence.agent_id);
            Ok(MessageResponse::None)
        }

        ClientEvent::MarkRead(read) => {
            realtime.pipeline().mark_read(read).await?;
            Ok(MessageResponse::None)
        }

        ClientEvent::CloseConversation(action) => {
            realtime.pipeline().close(action).await?;
            Ok(MessageResponse::None)
        }

        ClientEvent::ReopenConversation(action) => {
            realtime.pipeline().reopen(action).await?;
            Ok(MessageResponse::None)
        }
    }
}

/// Register a customer socket and join its personal room.
///
/// The conversation room is joined only for a conversation this customer
/// owns; anything else is reported as not found after the personal room join.
async fn handle_customer_join(
    join: CustomerJoin,
    conn_id: ConnectionId,
    state: &AppState,
) -> Result<()> {
    let realtime = state.realtime();
    realtime
        .registry()
        .register(conn_id, &join.customer_id, UserType::Customer, None);
    realtime
        .rooms()
        .join(conn_id, Room::customer(&join.customer_id));
    tracing::debug!(connection_id = %conn_id, customer_id = %join.customer_id, "Customer joined");

    let Some(conversation_id) = join.conversation_id else {
        return Ok(());
    };
    let owned = state
        .store()
        .get_conversation(&conversation_id)
        .await?
        .is_some_and(|c| c.customer_id == join.customer_id);
    if !owned {
        return Err(ServerError::NotFound(format!("conversation {conversation_id}")));
    }

    realtime
        .registry()
        .attach_conversation(conn_id, conversation_id.as_str());
    realtime
        .rooms()
        .join(conn_id, Room::conversation(conversation_id));
    Ok(())
}

fn handle_agent_join(join: AgentJoin, conn_id: ConnectionId, state: &AppState) {
    let realtime = state.realtime();
    realtime.registry().register(
        conn_id,
        &join.agent_id,
        UserType::Agent,
        Some(join.conversation_id.clone()),
    );
    let rooms = realtime.rooms();
    rooms.join(conn_id, Room::Agents);
    rooms.join(conn_id, Room::agent(&join.agent_id));
    rooms.join(conn_id, Room::conversation(&join.conversation_id));
    tracing::debug!(
        connection_id = %conn_id,
        agent_id = %join.agent_id,
        conversation_id = %join.conversation_id,
        "Agent joined"
    );
}

fn handle_agent_online(presence: AgentPresence, conn_id: ConnectionId, state: &AppState) {
    let realtime = state.realtime();
    if realtime.registry().lookup(conn_id).is_none() {
        realtime
            .registry()
            .register(conn_id, &presence.agent_id, UserType::Agent, None);
    }
    realtime.rooms().join(conn_id, Room::Agents);
    realtime
        .rooms()
        .join(conn_id, Room::agent(&presence.agent_id));
    realtime.presence().set_online(&presence.agent_id);
}

fn handle_typing(signal: TypingSignal, conn_id: ConnectionId, state: &AppState) {
    state.realtime().typing().on_typing_signal(conn_id, signal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::realtime::test_support::{drain, event_names};
    use chatdesk_store::{Agent, ConversationStore, InMemoryStore, NewConversation};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn state() -> (Arc<InMemoryStore>, AppState) {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_agent(&Agent::new("a1", "Grace")).await.unwrap();
        let state = AppState::new(store.clone(), ServerConfig::default());
        (store, state)
    }

    fn connect(state: &AppState) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (state.realtime().connect(tx), rx)
    }

    fn expect_error(response: MessageResponse) -> (Option<String>, String) {
        match response {
            MessageResponse::Single(ServerEvent::MessageError(err)) => (err.temp_id, err.error),
            other => panic!("expected message:error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let (_store, state) = state().await;
        let (conn, _rx) = connect(&state);

        let response = handle_frame(r#"{"event":"ping"}"#, conn, &state).await;
        assert!(matches!(response, MessageResponse::Single(ServerEvent::Pong)));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (_store, state) = state().await;
        let (conn, _rx) = connect(&state);

        let (temp_id, error) = expect_error(handle_frame("{not json", conn, &state).await);
        assert_eq!(temp_id, None);
        assert!(error.contains("invalid JSON"));
    }

    #[tokio::test]
    async fn test_schema_mismatch_echoes_temp_id() {
        let (store, state) = state().await;
        let (conn, _rx) = connect(&state);

        let frame = r#"{"event":"customer:message","data":{"content":"hi","tempId":"tmp-7"}}"#;
        let (temp_id, error) = expect_error(handle_frame(frame, conn, &state).await);

        assert_eq!(temp_id.as_deref(), Some("tmp-7"));
        assert!(error.contains("customerId"));
        assert_eq!(store.conversation_count(), 0);
    }

    #[tokio::test]
    async fn test_semantic_validation_error() {
        let (_store, state) = state().await;
        let (conn, _rx) = connect(&state);

        let frame = r#"{"event":"customer:message","data":{"customerId":"c1","content":"  ","tempId":"tmp-8"}}"#;
        let (temp_id, error) = expect_error(handle_frame(frame, conn, &state).await);

        assert_eq!(temp_id.as_deref(), Some("tmp-8"));
        assert!(error.starts_with("Validation failed"));
    }

    #[tokio::test]
    async fn test_agent_message_to_missing_conversation_echoes_temp_id() {
        let (store, state) = state().await;
        let (conn, _rx) = connect(&state);

        let frame = r#"{"event":"agent:message","data":{"conversationId":"missing","agentId":"a1","content":"hello","tempId":"tmp-9"}}"#;
        let (temp_id, error) = expect_error(handle_frame(frame, conn, &state).await);

        assert_eq!(temp_id.as_deref(), Some("tmp-9"));
        assert!(error.starts_with("Not found"));
        assert!(store.list_messages("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_joins_register_and_place_in_rooms() {
        let (store, state) = state().await;
        let conv = store
            .create_conversation(NewConversation::new("c1"))
            .await
            .unwrap();
        let (customer, _crx) = connect(&state);
        let (agent, _arx) = connect(&state);

        let customer_join = format!(
            r#"{{"event":"customer:join","data":{{"customerId":"c1","conversationId":"{}"}}}}"#,
            conv.id
        );
        let response = handle_frame(&customer_join, customer, &state).await;
        assert!(matches!(response, MessageResponse::None));

        let agent_join = format!(
            r#"{{"event":"agent:join","data":{{"agentId":"a1","conversationId":"{}"}}}}"#,
            conv.id
        );
        handle_frame(&agent_join, agent, &state).await;

        let rooms = state.realtime().rooms();
        assert!(rooms.is_member(customer, &Room::customer("c1")));
        assert!(rooms.is_member(customer, &Room::conversation(&conv.id)));
        assert!(rooms.is_member(agent, &Room::Agents));
        assert!(rooms.is_member(agent, &Room::agent("a1")));
        assert!(rooms.is_member(agent, &Room::conversation(&conv.id)));

        let entry = state.realtime().registry().lookup(customer).unwrap();
        assert_eq!(entry.conversation_id.as_deref(), Some(conv.id.as_str()));
        let entry = state.realtime().registry().lookup(agent).unwrap();
        assert_eq!(entry.user_type, UserType::Agent);
    }

    #[tokio::test]
    async fn test_customer_cannot_join_another_customers_conversation() {
        let (store, state) = state().await;
        let theirs = store
            .create_conversation(NewConversation::new("c2"))
            .await
            .unwrap();
        let (intruder, _rx) = connect(&state);

        let frame = format!(
            r#"{{"event":"customer:join","data":{{"customerId":"c1","conversationId":"{}"}}}}"#,
            theirs.id
        );
        let (_temp_id, error) = expect_error(handle_frame(&frame, intruder, &state).await);
        assert!(error.starts_with("Not found"));

        let rooms = state.realtime().rooms();
        assert!(!rooms.is_member(intruder, &Room::conversation(&theirs.id)));
        assert!(rooms.is_member(intruder, &Room::customer("c1")));
        let entry = state.realtime().registry().lookup(intruder).unwrap();
        assert_eq!(entry.conversation_id, None);
    }

    #[tokio::test]
    async fn test_agent_online_broadcasts_during_outage() {
        let (store, state) = state().await;
        let (agent, _arx) = connect(&state);
        let (_customer, mut customer_rx) = connect(&state);
        store.set_available(false);

        let response =
            handle_frame(r#"{"event":"agent:online","data":{"agentId":"a1"}}"#, agent, &state).await;

        assert!(matches!(response, MessageResponse::None));
        match drain(&mut customer_rx).as_slice() {
            [ServerEvent::AgentStatus(status)] => {
                assert_eq!(status.agent_id, "a1");
                assert!(status.is_online);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(state.realtime().rooms().is_member(agent, &Room::Agents));
    }

    #[tokio::test]
    async fn test_customer_message_flow() {
        let (_store, state) = state().await;
        let (customer, mut customer_rx) = connect(&state);

        let response = handle_frame(
            r#"{"event":"customer:message","data":{"customerId":"c1","content":"hi","tempId":"tmp-1"}}"#,
            customer,
            &state,
        )
        .await;

        assert!(matches!(response, MessageResponse::None));
        assert_eq!(event_names(&drain(&mut customer_rx)), vec!["message:received"]);
    }
}

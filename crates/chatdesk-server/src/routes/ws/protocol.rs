//! WebSocket protocol types for client-server communication.
//!
//! Every frame is `{"event": "<name>", "data": {...}}` with camelCase payload keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chatdesk_store::{AgentSummary, Conversation, ConversationStatus, Message, UserType};

/// Events from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// A customer widget announces itself.
    #[serde(rename = "customer:join")]
    CustomerJoin(CustomerJoin),
    /// A customer sends a chat message.
    #[serde(rename = "customer:message")]
    CustomerMessage(CustomerMessage),
    #[serde(rename = "customer:typing")]
    CustomerTyping(TypingSignal),
    /// An agent opens a conversation in the dashboard.
    #[serde(rename = "agent:join")]
    AgentJoin(AgentJoin),
    /// An agent replies in a conversation.
    #[serde(rename = "agent:message")]
    AgentMessage(AgentMessage),
    #[serde(rename = "agent:typing")]
    AgentTyping(TypingSignal),
    #[serde(rename = "agent:online")]
    AgentOnline(AgentPresence),
    #[serde(rename = "agent:offline")]
    AgentOffline(AgentPresence),
    /// Read receipt for a batch of messages.
    #[serde(rename = "messages:mark-read")]
    MarkRead(MarkRead),
    #[serde(rename = "conversation:close")]
    CloseConversation(ConversationAction),
    #[serde(rename = "conversation:reopen")]
    ReopenConversation(ConversationAction),
    /// Keep-alive.
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerJoin {
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMessage {
    /// Absent for a customer's first message; the server resolves one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Client correlation id for the optimistic placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

/// Typing payload. Used verbatim for `typing:start` and `typing:stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_type: UserType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentJoin {
    pub agent_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub conversation_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPresence {
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
    pub read_by: String,
    pub read_by_type: UserType,
}

/// Payload of `conversation:close` and `conversation:reopen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAction {
    pub conversation_id: String,
    pub agent_id: String,
}

/// Semantic validation failures, checked after the payload parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("message must have content or an attached file")]
    EmptyContent,

    #[error("message content is {actual} characters, limit is {max}")]
    ContentTooLong { actual: usize, max: usize },

    #[error("fileName given without fileUrl")]
    FileNameWithoutUrl,

    #[error("senderType must be '{expected}' for {event}")]
    SenderTypeMismatch {
        expected: UserType,
        event: &'static str,
    },

    #[error("messageIds must not be empty")]
    NoMessageIds,
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(())
}

fn require_opt(value: Option<&str>, field: &'static str) -> Result<(), ValidationError> {
    match value {
        Some(v) => require(v, field),
        None => Ok(()),
    }
}

fn check_body(
    content: &str,
    file_url: Option<&str>,
    file_name: Option<&str>,
    max_length: usize,
) -> Result<(), ValidationError> {
    let has_file = file_url.is_some_and(|url| !url.trim().is_empty());
    if file_name.is_some() && !has_file {
        return Err(ValidationError::FileNameWithoutUrl);
    }
    if content.trim().is_empty() && !has_file {
        return Err(ValidationError::EmptyContent);
    }
    let actual = content.chars().count();
    if actual > max_length {
        return Err(ValidationError::ContentTooLong {
            actual,
            max: max_length,
        });
    }
    Ok(())
}

fn check_typing(
    signal: &TypingSignal,
    expected: UserType,
    event: &'static str,
) -> Result<(), ValidationError> {
    require(&signal.conversation_id, "conversationId")?;
    require(&signal.sender_id, "senderId")?;
    if signal.sender_type != expected {
        return Err(ValidationError::SenderTypeMismatch { expected, event });
    }
    Ok(())
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CustomerJoin(_) => "customer:join",
            Self::CustomerMessage(_) => "customer:message",
            Self::CustomerTyping(_) => "customer:typing",
            Self::AgentJoin(_) => "agent:join",
            Self::AgentMessage(_) => "agent:message",
            Self::AgentTyping(_) => "agent:typing",
            Self::AgentOnline(_) => "agent:online",
            Self::AgentOffline(_) => "agent:offline",
            Self::MarkRead(_) => "messages:mark-read",
            Self::CloseConversation(_) => "conversation:close",
            Self::ReopenConversation(_) => "conversation:reopen",
            Self::Ping => "ping",
        }
    }

    /// Client correlation id carried by message submissions.
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            Self::CustomerMessage(msg) => msg.temp_id.as_deref(),
            Self::AgentMessage(msg) => msg.temp_id.as_deref(),
            _ => None,
        }
    }

    /// Check the semantic rules the type system cannot express.
    pub fn validate(&self, max_message_length: usize) -> Result<(), ValidationError> {
        match self {
            Self::CustomerJoin(join) => {
                require(&join.customer_id, "customerId")?;
                require_opt(join.conversation_id.as_deref(), "conversationId")
            }
            Self::CustomerMessage(msg) => {
                require(&msg.customer_id, "customerId")?;
                require_opt(msg.conversation_id.as_deref(), "conversationId")?;
                check_body(
                    &msg.content,
                    msg.file_url.as_deref(),
                    msg.file_name.as_deref(),
                    max_message_length,
                )
            }
            Self::CustomerTyping(signal) => {
                check_typing(signal, UserType::Customer, "customer:typing")
            }
            Self::AgentJoin(join) => {
                require(&join.agent_id, "agentId")?;
                require(&join.conversation_id, "conversationId")
            }
            Self::AgentMessage(msg) => {
                require(&msg.agent_id, "agentId")?;
                require(&msg.conversation_id, "conversationId")?;
                check_body(
                    &msg.content,
                    msg.file_url.as_deref(),
                    msg.file_name.as_deref(),
                    max_message_length,
                )
            }
            Self::AgentTyping(signal) => check_typing(signal, UserType::Agent, "agent:typing"),
            Self::AgentOnline(presence) | Self::AgentOffline(presence) => {
                require(&presence.agent_id, "agentId")
            }
            Self::MarkRead(read) => {
                require(&read.conversation_id, "conversationId")?;
                require(&read.read_by, "readBy")?;
                if read.message_ids.is_empty() {
                    return Err(ValidationError::NoMessageIds);
                }
                read.message_ids
                    .iter()
                    .try_for_each(|id| require(id, "messageIds[]"))
            }
            Self::CloseConversation(action) | Self::ReopenConversation(action) => {
                require(&action.conversation_id, "conversationId")?;
                require(&action.agent_id, "agentId")
            }
            Self::Ping => Ok(()),
        }
    }
}

/// Events from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A new conversation exists. Sent to the agents room.
    #[serde(rename = "conversation:created")]
    ConversationCreated(ConversationListing),
    /// Conversation metadata changed. Sent to the agents room.
    #[serde(rename = "conversation:updated")]
    ConversationUpdated(ConversationListing),
    /// Lifecycle change, sent to the conversation room.
    #[serde(rename = "conversation:status")]
    ConversationStatus(ConversationStatusChange),
    #[serde(rename = "message:received")]
    MessageReceived(MessageReceived),
    /// Sent to the originating connection only.
    #[serde(rename = "message:error")]
    MessageError(MessageError),
    #[serde(rename = "typing:start")]
    TypingStart(TypingSignal),
    #[serde(rename = "typing:stop")]
    TypingStop(TypingSignal),
    /// Presence change, sent to every connection.
    #[serde(rename = "agent:status")]
    AgentStatus(AgentStatus),
    #[serde(rename = "messages:read")]
    MessagesRead(MessagesRead),
    #[serde(rename = "pong")]
    Pong,
}

/// Conversation as shown in agent listings: summary of the assigned agent and
/// the latest message inlined, message history left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListing {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub agent: Option<AgentSummary>,
    pub last_message: Option<Message>,
    pub tag_count: u32,
    pub note_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStatusChange {
    pub conversation_id: String,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// A persisted message plus the submitter's correlation id, when one was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceived {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_id: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRead {
    pub conversation_id: String,
    pub message_ids: Vec<String>,
    pub read_by: String,
}

impl ServerEvent {
    /// Create an error event for the originating connection.
    pub fn message_error(temp_id: Option<String>, error: impl Into<String>) -> Self {
        Self::MessageError(MessageError {
            temp_id,
            error: error.into(),
        })
    }

    pub fn message_received(message: Message, temp_id: Option<String>) -> Self {
        Self::MessageReceived(MessageReceived { message, temp_id })
    }

    pub fn status_change(conversation: &Conversation) -> Self {
        Self::ConversationStatus(ConversationStatusChange {
            conversation_id: conversation.id.clone(),
            status: conversation.status,
            agent_id: conversation.agent_id.clone(),
        })
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConversationCreated(_) => "conversation:created",
            Self::ConversationUpdated(_) => "conversation:updated",
            Self::ConversationStatus(_) => "conversation:status",
            Self::MessageReceived(_) => "message:received",
            Self::MessageError(_) => "message:error",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::AgentStatus(_) => "agent:status",
            Self::MessagesRead(_) => "messages:read",
            Self::Pong => "pong",
        }
    }
}

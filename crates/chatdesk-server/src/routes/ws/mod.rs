//! WebSocket transport for the real-time core.
//!
//! ## Module Structure
//!
//! - `protocol` - Event types (ClientEvent, ServerEvent) and payload validation
//! - `connection` - Connection lifecycle: reader loop, writer task, cleanup
//! - `handlers` - Per-event dispatch and the per-frame failure boundary

mod connection;
mod handlers;
mod protocol;

use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};

use crate::state::AppState;

pub use handlers::{MessageResponse, handle_event, handle_frame};
pub use protocol::{
    AgentJoin, AgentMessage, AgentPresence, AgentStatus, ClientEvent, ConversationAction,
    ConversationListing, ConversationStatusChange, CustomerJoin, CustomerMessage, MarkRead,
    MessageError, MessageReceived, MessagesRead, ServerEvent, TypingSignal, ValidationError,
};

/// GET /ws - WebSocket upgrade handler.
///
/// Connections are anonymous until they send a `customer:join`, `agent:join`
/// or a first message.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| connection::handle_socket(socket, state))
}

//! HTTP and WebSocket routes.

pub mod conversations;
pub mod health;
pub mod ws;

pub use conversations::get_conversation_handler;
pub use health::{HealthResponse, health_routes};
pub use ws::{ClientEvent, ServerEvent, ws_handler};

//! Read-only conversation endpoint.

use axum::{
    Json,
    extract::{Path, State},
};

use chatdesk_store::ConversationStore;

use crate::error::ServerError;
use crate::realtime::listing::build_listing;
use crate::routes::ws::ConversationListing;
use crate::state::AppState;

/// GET /api/v1/conversations/{id} - One conversation in listing shape.
pub async fn get_conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationListing>, ServerError> {
    let conversation = state
        .store()
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!("Conversation {} not found", conversation_id))
        })?;

    let listing = build_listing(state.store().as_ref(), conversation).await?;
    Ok(Json(listing))
}

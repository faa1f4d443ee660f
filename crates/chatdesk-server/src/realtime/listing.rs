//! The enriched conversation shape shared by listings and lifecycle events.

use chatdesk_store::{AgentSummary, Conversation, ConversationStore};

use crate::error::Result;
use crate::routes::ws::ConversationListing;

/// Inline the assigned agent, the latest message and annotation counts.
pub async fn build_listing(
    store: &dyn ConversationStore,
    conversation: Conversation,
) -> Result<ConversationListing> {
    let agent = match conversation.agent_id.as_deref() {
        Some(agent_id) => store
            .get_agent(agent_id)
            .await?
            .as_ref()
            .map(AgentSummary::from),
        None => None,
    };
    let last_message = store.latest_message(&conversation.id).await?;
    let counts = store.annotation_counts(&conversation.id).await?;

    Ok(ConversationListing {
        conversation,
        agent,
        last_message,
        tag_count: counts.tags,
        note_count: counts.notes,
    })
}

//! Conversation resolution for customer messages.
//!
//! A customer has at most one open or assigned conversation. Lookup and
//! creation run under a per-customer lock so concurrent first messages from
//! the same customer cannot both create one.

use std::sync::Arc;

use chatdesk_store::{
    Conversation, ConversationPatch, ConversationStore, NewConversation, SharedStore,
};

use super::listing::build_listing;
use super::locks::{KeyedGuard, KeyedLocks};
use super::rooms::{Room, RoomRouter};
use crate::error::{Result, ServerError};
use crate::routes::ws::ServerEvent;

/// The customer fields carried by a `customer:message`.
#[derive(Debug, Clone, Default)]
pub struct CustomerIdentity {
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub conversation: Conversation,
    /// Whether the conversation was created by this call.
    pub created: bool,
}

pub struct ConversationResolver {
    store: SharedStore,
    rooms: Arc<RoomRouter>,
    customer_locks: KeyedLocks,
}

impl ConversationResolver {
    pub fn new(store: SharedStore, rooms: Arc<RoomRouter>) -> Self {
        Self {
            store,
            rooms,
            customer_locks: KeyedLocks::new(),
        }
    }

    /// Serialize with every other resolution for `customer_id`.
    pub async fn lock_customer(&self, customer_id: &str) -> KeyedGuard<'_> {
        self.customer_locks.lock(customer_id).await
    }

    pub async fn resolve_for_customer_message(
        &self,
        customer: &CustomerIdentity,
        explicit_conversation_id: Option<&str>,
    ) -> Result<Resolution> {
        let _guard = self.lock_customer(&customer.customer_id).await;

        if let Some(conversation_id) = explicit_conversation_id {
            let conversation = self
                .store
                .get_conversation(conversation_id)
                .await?
                .filter(|c| c.customer_id == customer.customer_id)
                .ok_or_else(|| {
                    ServerError::NotFound(format!("conversation {conversation_id}"))
                })?;
            return Ok(Resolution {
                conversation,
                created: false,
            });
        }

        if let Some(existing) = self
            .store
            .find_active_conversation(&customer.customer_id)
            .await?
        {
            let patch = ConversationPatch {
                customer_name: customer.customer_name.clone(),
                customer_email: customer.customer_email.clone(),
                ..ConversationPatch::touch()
            };
            let conversation = self.store.update_conversation(&existing.id, patch).await?;
            return Ok(Resolution {
                conversation,
                created: false,
            });
        }

        let conversation = self
            .store
            .create_conversation(NewConversation {
                customer_name: customer.customer_name.clone(),
                customer_email: customer.customer_email.clone(),
                ..NewConversation::new(customer.customer_id.clone())
            })
            .await?;
        tracing::info!(
            conversation_id = %conversation.id,
            customer_id = %conversation.customer_id,
            "Conversation created"
        );

        let listing = build_listing(self.store.as_ref(), conversation.clone()).await?;
        self.rooms
            .broadcast(&Room::Agents, ServerEvent::ConversationCreated(listing));

        Ok(Resolution {
            conversation,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::test_support::{attach, drain, event_names};
    use chatdesk_store::{ConversationStatus, ConversationStore, InMemoryStore};

    fn setup() -> (Arc<InMemoryStore>, Arc<RoomRouter>, Arc<ConversationResolver>) {
        let store = Arc::new(InMemoryStore::new());
        let rooms = Arc::new(RoomRouter::new());
        let resolver = Arc::new(ConversationResolver::new(store.clone(), Arc::clone(&rooms)));
        (store, rooms, resolver)
    }

    fn customer(id: &str) -> CustomerIdentity {
        CustomerIdentity {
            customer_id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_creates_and_announces_first_conversation() {
        let (_store, rooms, resolver) = setup();
        let (agent, mut agent_rx) = attach(&rooms);
        rooms.join(agent, Room::Agents);

        let resolution = resolver
            .resolve_for_customer_message(&customer("c1"), None)
            .await
            .unwrap();

        assert!(resolution.created);
        assert_eq!(resolution.conversation.status, ConversationStatus::Open);
        assert_eq!(resolution.conversation.unread_count, 0);
        assert_eq!(event_names(&drain(&mut agent_rx)), vec!["conversation:created"]);
    }

    #[tokio::test]
    async fn test_reuses_active_conversation_and_fills_identity() {
        let (_store, _rooms, resolver) = setup();
        let first = resolver
            .resolve_for_customer_message(&customer("c1"), None)
            .await
            .unwrap();

        let identity = CustomerIdentity {
            customer_name: Some("Ada".to_string()),
            ..customer("c1")
        };
        let second = resolver
            .resolve_for_customer_message(&identity, None)
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.conversation.id, first.conversation.id);
        assert_eq!(second.conversation.customer_name.as_deref(), Some("Ada"));

        // A later message without a name keeps the stored one.
        let third = resolver
            .resolve_for_customer_message(&customer("c1"), None)
            .await
            .unwrap();
        assert_eq!(third.conversation.customer_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_closed_conversation_is_not_reused() {
        let (store, _rooms, resolver) = setup();
        let first = resolver
            .resolve_for_customer_message(&customer("c1"), None)
            .await
            .unwrap();
        store
            .update_conversation(
                &first.conversation.id,
                ConversationPatch::touch().with_status(ConversationStatus::Closed),
            )
            .await
            .unwrap();

        let second = resolver
            .resolve_for_customer_message(&customer("c1"), None)
            .await
            .unwrap();
        assert!(second.created);
        assert_ne!(second.conversation.id, first.conversation.id);
    }

    #[tokio::test]
    async fn test_explicit_id_must_exist_and_belong_to_customer() {
        let (_store, _rooms, resolver) = setup();
        let err = resolver
            .resolve_for_customer_message(&customer("c1"), Some("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        let other = resolver
            .resolve_for_customer_message(&customer("c2"), None)
            .await
            .unwrap();
        let err = resolver
            .resolve_for_customer_message(&customer("c1"), Some(&other.conversation.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_messages_create_one_conversation() {
        let (store, _rooms, resolver) = setup();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve_for_customer_message(&customer("c-new"), None)
                    .await
            }));
        }

        let mut ids = Vec::new();
        let mut created = 0;
        for handle in handles {
            let resolution = handle.await.unwrap().unwrap();
            created += usize::from(resolution.created);
            ids.push(resolution.conversation.id);
        }
        ids.dedup();

        assert_eq!(created, 1);
        assert_eq!(ids.len(), 1);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_storage_outage_propagates() {
        let (store, _rooms, resolver) = setup();
        store.set_available(false);

        let err = resolver
            .resolve_for_customer_message(&customer("c1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Storage(_)));
    }
}

//! Message pipeline: persist, update conversation metadata, fan out.
//!
//! Everything that mutates one conversation runs under that conversation's
//! lock, from the first read to the last broadcast. Room members therefore see
//! messages in persisted order.

use std::sync::Arc;

use chatdesk_store::{
    Conversation, ConversationPatch, ConversationStatus, ConversationStore, Message, NewMessage,
    SharedStore, UserType,
};

use super::listing::build_listing;
use super::locks::KeyedLocks;
use super::registry::{ConnectionId, ConnectionRegistry};
use super::resolver::{ConversationResolver, CustomerIdentity};
use super::rooms::{Room, RoomRouter};
use crate::error::{Result, ServerError};
use crate::routes::ws::{
    AgentMessage, ConversationAction, CustomerMessage, MarkRead, MessagesRead, ServerEvent,
};

/// Sender name used when a customer never told us theirs.
const ANONYMOUS_CUSTOMER: &str = "Customer";

pub struct MessagePipeline {
    store: SharedStore,
    rooms: Arc<RoomRouter>,
    registry: Arc<ConnectionRegistry>,
    resolver: ConversationResolver,
    conversation_locks: KeyedLocks,
}

impl MessagePipeline {
    pub fn new(
        store: SharedStore,
        rooms: Arc<RoomRouter>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let resolver = ConversationResolver::new(Arc::clone(&store), Arc::clone(&rooms));
        Self {
            store,
            rooms,
            registry,
            resolver,
            conversation_locks: KeyedLocks::new(),
        }
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.resolver
    }

    pub async fn handle_customer_message(
        &self,
        connection: ConnectionId,
        msg: CustomerMessage,
    ) -> Result<Message> {
        let identity = CustomerIdentity {
            customer_id: msg.customer_id.clone(),
            customer_name: msg.customer_name.clone(),
            customer_email: msg.customer_email.clone(),
        };
        let resolution = self
            .resolver
            .resolve_for_customer_message(&identity, msg.conversation_id.as_deref())
            .await?;
        let conversation_id = resolution.conversation.id.clone();

        match self.registry.lookup(connection) {
            Some(_) => self.registry.attach_conversation(connection, &conversation_id),
            None => self.registry.register(
                connection,
                &msg.customer_id,
                UserType::Customer,
                Some(conversation_id.clone()),
            ),
        }
        self.rooms.join(connection, Room::conversation(&conversation_id));
        self.rooms.join(connection, Room::customer(&msg.customer_id));

        let _guard = self.conversation_locks.lock(&conversation_id).await;

        let sender_name = msg
            .customer_name
            .clone()
            .or_else(|| resolution.conversation.customer_name.clone())
            .unwrap_or_else(|| ANONYMOUS_CUSTOMER.to_string());
        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation_id.clone(),
                sender_id: msg.customer_id.clone(),
                sender_type: UserType::Customer,
                sender_name,
                content: msg.content,
                file_url: msg.file_url,
                file_name: msg.file_name,
            })
            .await?;

        let conversation = self
            .store
            .update_conversation(&conversation_id, ConversationPatch::touch().bump_unread())
            .await?;

        self.rooms.broadcast(
            &Room::conversation(&conversation_id),
            ServerEvent::message_received(message.clone(), msg.temp_id),
        );
        self.announce_update(conversation).await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            customer_id = %msg.customer_id,
            message_id = %message.id,
            "Customer message delivered"
        );
        Ok(message)
    }

    pub async fn handle_agent_message(
        &self,
        connection: ConnectionId,
        msg: AgentMessage,
    ) -> Result<Message> {
        let _guard = self.conversation_locks.lock(&msg.conversation_id).await;

        let conversation = self.require_conversation(&msg.conversation_id).await?;
        let agent = self
            .store
            .get_agent(&msg.agent_id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("agent {}", msg.agent_id)))?;

        if self.registry.lookup(connection).is_none() {
            self.registry.register(
                connection,
                &msg.agent_id,
                UserType::Agent,
                Some(conversation.id.clone()),
            );
            self.rooms.join(connection, Room::Agents);
            self.rooms.join(connection, Room::agent(&msg.agent_id));
        }
        self.rooms.join(connection, Room::conversation(&conversation.id));

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id.clone(),
                sender_id: msg.agent_id.clone(),
                sender_type: UserType::Agent,
                sender_name: agent.name,
                content: msg.content,
                file_url: msg.file_url,
                file_name: msg.file_name,
            })
            .await?;

        // First responder claims an unassigned conversation.
        let claims = conversation.status == ConversationStatus::Open;
        let mut patch = ConversationPatch::touch();
        if claims {
            patch = patch.with_status(ConversationStatus::Assigned);
            if conversation.agent_id.is_none() {
                patch = patch.with_agent(msg.agent_id.clone());
            }
        }
        let updated = self.store.update_conversation(&conversation.id, patch).await?;

        self.rooms.broadcast_many(
            &[
                Room::conversation(&updated.id),
                Room::customer(&updated.customer_id),
            ],
            None,
            ServerEvent::message_received(message.clone(), msg.temp_id),
        );
        if claims {
            tracing::info!(
                conversation_id = %updated.id,
                agent_id = %msg.agent_id,
                "Conversation assigned"
            );
            self.rooms.broadcast(
                &Room::conversation(&updated.id),
                ServerEvent::status_change(&updated),
            );
        }
        self.announce_update(updated).await?;

        Ok(message)
    }

    /// Apply a read receipt. Returns the ids that changed state.
    pub async fn mark_read(&self, read: MarkRead) -> Result<Vec<String>> {
        let _guard = self.conversation_locks.lock(&read.conversation_id).await;

        let conversation = self.require_conversation(&read.conversation_id).await?;
        let changed = self
            .store
            .mark_messages_read(&conversation.id, &read.message_ids)
            .await?;

        if read.read_by_type == UserType::Agent {
            let updated = self
                .store
                .update_conversation(&conversation.id, ConversationPatch::touch().reset_unread())
                .await?;
            self.announce_update(updated).await?;
        }

        self.rooms.broadcast(
            &Room::conversation(&conversation.id),
            ServerEvent::MessagesRead(MessagesRead {
                conversation_id: conversation.id,
                message_ids: read.message_ids,
                read_by: read.read_by,
            }),
        );
        Ok(changed)
    }

    /// Close a conversation from any status.
    pub async fn close(&self, action: ConversationAction) -> Result<Conversation> {
        let _guard = self.conversation_locks.lock(&action.conversation_id).await;

        let conversation = self.require_conversation(&action.conversation_id).await?;
        let updated = if conversation.status == ConversationStatus::Closed {
            conversation
        } else {
            let updated = self
                .store
                .update_conversation(
                    &conversation.id,
                    ConversationPatch::touch().with_status(ConversationStatus::Closed),
                )
                .await?;
            tracing::info!(
                conversation_id = %updated.id,
                agent_id = %action.agent_id,
                "Conversation closed"
            );
            updated
        };

        self.announce_lifecycle(&updated).await?;
        Ok(updated)
    }

    /// Move a closed conversation back to `assigned` under the acting agent.
    ///
    /// Rejected when the customer already has another active conversation.
    pub async fn reopen(&self, action: ConversationAction) -> Result<Conversation> {
        let customer_id = self
            .require_conversation(&action.conversation_id)
            .await?
            .customer_id;
        let _customer_guard = self.resolver.lock_customer(&customer_id).await;
        let _guard = self.conversation_locks.lock(&action.conversation_id).await;

        let conversation = self.require_conversation(&action.conversation_id).await?;
        let updated = if conversation.status == ConversationStatus::Closed {
            if let Some(active) = self
                .store
                .find_active_conversation(&conversation.customer_id)
                .await?
            {
                return Err(ServerError::BadRequest(format!(
                    "customer {} already has active conversation {}",
                    conversation.customer_id, active.id
                )));
            }
            let updated = self
                .store
                .update_conversation(
                    &conversation.id,
                    ConversationPatch::touch()
                        .with_status(ConversationStatus::Assigned)
                        .with_agent(action.agent_id.clone()),
                )
                .await?;
            tracing::info!(
                conversation_id = %updated.id,
                agent_id = %action.agent_id,
                "Conversation reopened"
            );
            updated
        } else {
            conversation
        };

        self.announce_lifecycle(&updated).await?;
        Ok(updated)
    }

    async fn require_conversation(&self, id: &str) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("conversation {id}")))
    }

    async fn announce_update(&self, conversation: Conversation) -> Result<()> {
        let listing = build_listing(self.store.as_ref(), conversation).await?;
        self.rooms
            .broadcast(&Room::Agents, ServerEvent::ConversationUpdated(listing));
        Ok(())
    }

    async fn announce_lifecycle(&self, conversation: &Conversation) -> Result<()> {
        self.rooms.broadcast(
            &Room::conversation(&conversation.id),
            ServerEvent::status_change(conversation),
        );
        self.announce_update(conversation.clone()).await
    }
}

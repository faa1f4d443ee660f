//! Storage abstraction for conversations, messages and agents.
//!
//! The real-time server only needs single-row reads and writes, so the trait
//! stays narrow. Two backends are provided:
//!
//! ```text
//! ConversationStore (trait)
//!     └── SqliteStore     - durable SQLite implementation
//!     └── InMemoryStore   - process-local maps, with outage simulation for tests
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::{
    Agent, AnnotationCounts, Conversation, ConversationPatch, ConversationStatus, Message,
    NewConversation, NewMessage,
};
use crate::{Result, StoreError};

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn ConversationStore>;

/// Persistence operations consumed by the routing server.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    // ── Agents ──────────────────────────────────────────────────────────

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;

    /// Insert or replace an agent row.
    async fn upsert_agent(&self, agent: &Agent) -> Result<()>;

    /// Update the durable presence fields. Fails with `NotFound` for unknown agents.
    ///
    /// A write whose `last_seen` is older than the stored one is dropped, so
    /// presence writes that finish out of order keep the newest state.
    async fn set_agent_presence(
        &self,
        id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<()>;

    // ── Conversations ───────────────────────────────────────────────────

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Most recently updated open or assigned conversation for a customer.
    async fn find_active_conversation(&self, customer_id: &str) -> Result<Option<Conversation>>;

    /// Create a conversation in `open` status with no unread messages.
    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation>;

    /// Apply a patch to one conversation and return the updated row.
    async fn update_conversation(&self, id: &str, patch: ConversationPatch)
    -> Result<Conversation>;

    // ── Messages ────────────────────────────────────────────────────────

    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    /// All messages of a conversation in persisted order.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<Message>>;

    /// Flag the given messages as read.
    ///
    /// Ids that belong to another conversation or are already read are skipped.
    /// Returns the ids that changed.
    async fn mark_messages_read(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<String>>;

    // ── Annotations ─────────────────────────────────────────────────────

    async fn annotation_counts(&self, conversation_id: &str) -> Result<AnnotationCounts>;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Default)]
struct Tables {
    agents: HashMap<String, Agent>,
    conversations: HashMap<String, Conversation>,
    /// Append-only, so insertion order is persisted order.
    messages: Vec<Message>,
    tags: HashMap<String, Vec<String>>,
    notes: HashMap<String, Vec<String>>,
}

/// Process-local store.
///
/// Used when no database is configured and throughout the test suites.
/// [`InMemoryStore::set_available`] simulates a storage outage: while
/// unavailable every operation fails with [`StoreError::Unavailable`].
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle outage simulation.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Attach a tag to a conversation.
    pub fn add_tag(&self, conversation_id: &str, tag: impl Into<String>) {
        self.tables
            .lock()
            .tags
            .entry(conversation_id.to_string())
            .or_default()
            .push(tag.into());
    }

    /// Attach an internal note to a conversation.
    pub fn add_note(&self, conversation_id: &str, note: impl Into<String>) {
        self.tables
            .lock()
            .notes
            .entry(conversation_id.to_string())
            .or_default()
            .push(note.into());
    }

    /// Number of stored conversations, across all statuses.
    pub fn conversation_count(&self) -> usize {
        self.tables.lock().conversations.len()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.check()?;
        Ok(self.tables.lock().agents.get(id).cloned())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        self.check()?;
        self.tables
            .lock()
            .agents
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn set_agent_presence(
        &self,
        id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        let agent = tables
            .agents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("agent {id}")))?;
        if agent.last_seen.is_some_and(|stored| stored > last_seen) {
            return Ok(());
        }
        agent.is_online = is_online;
        agent.last_seen = Some(last_seen);
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.check()?;
        Ok(self.tables.lock().conversations.get(id).cloned())
    }

    async fn find_active_conversation(&self, customer_id: &str) -> Result<Option<Conversation>> {
        self.check()?;
        let tables = self.tables.lock();
        Ok(tables
            .conversations
            .values()
            .filter(|c| c.customer_id == customer_id && c.status.is_active())
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        self.check()?;
        let now = Utc::now();
        let conversation = Conversation {
            id: new_id(),
            customer_id: new.customer_id,
            customer_name: new.customer_name,
            customer_email: new.customer_email,
            agent_id: None,
            status: ConversationStatus::Open,
            priority: new.priority,
            unread_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .lock()
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
    ) -> Result<Conversation> {
        self.check()?;
        let mut tables = self.tables.lock();
        let conversation = tables
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        patch.apply(conversation, Utc::now());
        Ok(conversation.clone())
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.check()?;
        let mut tables = self.tables.lock();
        if !tables.conversations.contains_key(&new.conversation_id) {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                new.conversation_id
            )));
        }
        let message = Message {
            id: new_id(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            sender_type: new.sender_type,
            sender_name: new.sender_name,
            content: new.content,
            file_url: new.file_url,
            file_name: new.file_name,
            is_read: false,
            created_at: Utc::now(),
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<Message>> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .rev()
            .find(|m| m.conversation_id == conversation_id)
            .cloned())
    }

    async fn mark_messages_read(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<String>> {
        self.check()?;
        let mut tables = self.tables.lock();
        let mut changed = Vec::new();
        for message in tables.messages.iter_mut() {
            if message.conversation_id == conversation_id
                && !message.is_read
                && message_ids.contains(&message.id)
            {
                message.is_read = true;
                changed.push(message.id.clone());
            }
        }
        Ok(changed)
    }

    async fn annotation_counts(&self, conversation_id: &str) -> Result<AnnotationCounts> {
        self.check()?;
        let tables = self.tables.lock();
        let count = |map: &HashMap<String, Vec<String>>| {
            map.get(conversation_id).map_or(0, |v| v.len() as u32)
        };
        Ok(AnnotationCounts {
            tags: count(&tables.tags),
            notes: count(&tables.notes),
        })
    }
}

//! Persistence for chatdesk: agents, conversations and messages.
//!
//! The routing server talks to storage only through [`ConversationStore`].
//! [`SqliteStore`] is the durable backend; [`InMemoryStore`] backs
//! development runs and tests.

pub mod error;
pub mod sqlite;
pub mod storage;
pub mod types;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use storage::{ConversationStore, InMemoryStore, SharedStore};
pub use types::{
    Agent, AgentSummary, AnnotationCounts, Conversation, ConversationPatch, ConversationStatus,
    Message, NewConversation, NewMessage, Priority, UserType,
};

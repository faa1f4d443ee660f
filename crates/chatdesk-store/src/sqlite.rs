//! SQLite-backed conversation store.
//!
//! Queries run on the blocking pool behind a single mutex-guarded connection.
//! Timestamps are stored as fixed-width RFC 3339 strings so that text ordering
//! matches time ordering.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::storage::{ConversationStore, new_id};
use crate::types::{
    Agent, AnnotationCounts, Conversation, ConversationPatch, ConversationStatus, Message,
    NewConversation, NewMessage,
};
use crate::{Result, StoreError};

/// Current schema version, tracked in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const CONVERSATION_COLUMNS: &str = "id, customer_id, customer_name, customer_email, agent_id, \
     status, priority, unread_count, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sender_type, sender_name, \
     content, file_url, file_name, is_read, created_at";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                StoreError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        initialize(&conn)?;

        info!("Conversation store opened at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        debug!("In-memory conversation store created");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Attach a tag to a conversation.
    pub async fn add_tag(&self, conversation_id: &str, tag: &str) -> Result<()> {
        let (conversation_id, tag) = (conversation_id.to_string(), tag.to_string());
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversation_tags (conversation_id, tag) VALUES (?1, ?2)",
                params![conversation_id, tag],
            )?;
            Ok(())
        })
        .await
    }

    /// Attach an internal note to a conversation.
    pub async fn add_note(&self, conversation_id: &str, body: &str) -> Result<()> {
        let (conversation_id, body) = (conversation_id.to_string(), body.to_string());
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO conversation_notes (id, conversation_id, body, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![new_id(), conversation_id, body, timestamp(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn initialize(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);
    if current_version >= SCHEMA_VERSION {
        debug!("Schema up to date (version {})", current_version);
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            is_online INTEGER NOT NULL DEFAULT 0,
            last_seen TEXT
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            customer_name TEXT,
            customer_email TEXT,
            agent_id TEXT,
            status TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'normal',
            unread_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_customer
            ON conversations(customer_id, status, updated_at);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id TEXT NOT NULL,
            sender_type TEXT NOT NULL,
            sender_name TEXT NOT NULL,
            content TEXT NOT NULL,
            file_url TEXT,
            file_name TEXT,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS conversation_tags (
            conversation_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (conversation_id, tag)
        );

        CREATE TABLE IF NOT EXISTS conversation_notes (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    info!("Schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_column<T, E>(
    idx: usize,
    raw: &str,
    parse: impl FnOnce(&str) -> std::result::Result<T, E>,
) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parse(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_column(idx, &raw, |s| {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
    })
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let last_seen: Option<String> = row.get(4)?;
    let last_seen = match last_seen {
        Some(raw) => Some(parse_column(4, &raw, |s| {
            DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
        })?),
        None => None,
    };
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        is_online: row.get(3)?,
        last_seen,
    })
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(5)?;
    let priority: String = row.get(6)?;
    Ok(Conversation {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        customer_name: row.get(2)?,
        customer_email: row.get(3)?,
        agent_id: row.get(4)?,
        status: parse_column(5, &status, str::parse)?,
        priority: parse_column(6, &priority, str::parse)?,
        unread_count: row.get(7)?,
        created_at: get_time(row, 8)?,
        updated_at: get_time(row, 9)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let sender_type: String = row.get(3)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_type: parse_column(3, &sender_type, str::parse)?,
        sender_name: row.get(4)?,
        content: row.get(5)?,
        file_url: row.get(6)?,
        file_name: row.get(7)?,
        is_read: row.get(8)?,
        created_at: get_time(row, 9)?,
    })
}

fn load_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], row_to_conversation)
        .optional()?)
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let id = id.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, email, is_online, last_seen FROM agents WHERE id = ?1",
                    params![id],
                    row_to_agent,
                )
                .optional()?)
        })
        .await
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let agent = agent.clone();
        self.call(move |conn| {
            conn.execute(
                r#"
                INSERT INTO agents (id, name, email, is_online, last_seen)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    is_online = excluded.is_online,
                    last_seen = excluded.last_seen
                "#,
                params![
                    agent.id,
                    agent.name,
                    agent.email,
                    agent.is_online,
                    agent.last_seen.map(timestamp),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_agent_presence(
        &self,
        id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        self.call(move |conn| {
            // Timestamps share one fixed-width UTC format, so text order is time order.
            let rows = conn.execute(
                "UPDATE agents SET is_online = ?2, last_seen = ?3
                 WHERE id = ?1 AND (last_seen IS NULL OR last_seen <= ?3)",
                params![id, is_online, timestamp(last_seen)],
            )?;
            if rows == 0 {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM agents WHERE id = ?1)",
                    params![id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(StoreError::NotFound(format!("agent {id}")));
                }
                debug!(agent_id = %id, "Dropped out-of-order presence write");
            }
            Ok(())
        })
        .await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let id = id.to_string();
        self.call(move |conn| load_conversation(conn, &id)).await
    }

    async fn find_active_conversation(&self, customer_id: &str) -> Result<Option<Conversation>> {
        let customer_id = customer_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                 WHERE customer_id = ?1 AND status IN ('open', 'assigned') \
                 ORDER BY updated_at DESC, rowid DESC LIMIT 1"
            );
            Ok(conn
                .query_row(&sql, params![customer_id], row_to_conversation)
                .optional()?)
        })
        .await
    }

    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        self.call(move |conn| {
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
            conn.execute(
                &format!(
                    "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    conversation.id,
                    conversation.customer_id,
                    conversation.customer_name,
                    conversation.customer_email,
                    conversation.agent_id,
                    conversation.status.as_str(),
                    conversation.priority.as_str(),
                    conversation.unread_count,
                    timestamp(conversation.created_at),
                    timestamp(conversation.updated_at),
                ],
            )?;
            Ok(conversation)
        })
        .await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
    ) -> Result<Conversation> {
        let id = id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut conversation = load_conversation(&tx, &id)?
                .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
            patch.apply(&mut conversation, Utc::now());
            tx.execute(
                r#"
                UPDATE conversations
                SET customer_name = ?2, customer_email = ?3, agent_id = ?4,
                    status = ?5, unread_count = ?6, updated_at = ?7
                WHERE id = ?1
                "#,
                params![
                    conversation.id,
                    conversation.customer_name,
                    conversation.customer_email,
                    conversation.agent_id,
                    conversation.status.as_str(),
                    conversation.unread_count,
                    timestamp(conversation.updated_at),
                ],
            )?;
            tx.commit()?;
            Ok(conversation)
        })
        .await
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.call(move |conn| {
            if load_conversation(conn, &new.conversation_id)?.is_none() {
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
            conn.execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.sender_type.as_str(),
                    message.sender_name,
                    message.content,
                    message.file_url,
                    message.file_name,
                    message.is_read,
                    timestamp(message.created_at),
                ],
            )?;
            Ok(message)
        })
        .await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 \
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let messages = stmt
                .query_map(params![conversation_id], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<Message>> {
        let conversation_id = conversation_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            );
            Ok(conn
                .query_row(&sql, params![conversation_id], row_to_message)
                .optional()?)
        })
        .await
    }

    async fn mark_messages_read(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<String>> {
        let conversation_id = conversation_id.to_string();
        let message_ids = message_ids.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "UPDATE messages SET is_read = 1 \
                     WHERE id = ?1 AND conversation_id = ?2 AND is_read = 0",
                )?;
                for id in message_ids {
                    if stmt.execute(params![id, conversation_id])? > 0 {
                        changed.push(id);
                    }
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn annotation_counts(&self, conversation_id: &str) -> Result<AnnotationCounts> {
        let conversation_id = conversation_id.to_string();
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT \
                    (SELECT COUNT(*) FROM conversation_tags WHERE conversation_id = ?1), \
                    (SELECT COUNT(*) FROM conversation_notes WHERE conversation_id = ?1)",
                params![conversation_id],
                |row| {
                    Ok(AnnotationCounts {
                        tags: row.get(0)?,
                        notes: row.get(1)?,
                    })
                },
            )?)
        })
        .await
    }
}

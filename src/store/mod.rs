mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Migration error: {message}")]
    Migration { message: String },

    #[error("Database error: {message}")]
    Database { message: String },
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }
}

/// Latest saved canvas of a room. There is at most one per room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub room_id: String,
    /// Encoded image exactly as the client sent it (usually a base64 data URL).
    pub image_data: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub room_id: String,
    pub user: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Durable per-room state: one canvas snapshot and an append-only chat log.
///
/// Every operation is scoped to a single room. Implementations are shared by
/// all connection tasks and must handle their own concurrency.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_snapshot(&self, room_id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// Creates the room's snapshot, or overwrites it in place if one exists.
    async fn upsert_snapshot(&self, room_id: &str, image_data: &str) -> Result<(), StoreError>;

    /// Appends a chat line. The timestamp is assigned by the store.
    async fn append_chat_message(
        &self,
        room_id: &str,
        user: &str,
        text: &str,
    ) -> Result<ChatMessage, StoreError>;

    /// Full chat log of a room, oldest first.
    async fn chat_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, StoreError>;
}

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
        SqliteSynchronous,
    },
    Row,
};

use super::{ChatMessage, Snapshot, Store, StoreError};

const MAX_CONNECTIONS: u32 = 8;

/// SQLite-backed [`Store`].
///
/// Connections are pooled and checked out per statement, so no database
/// handle outlives the operation that acquired it.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `url`, e.g. `sqlite://whiteboard.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::connection(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::connection(format!("Failed to connect to SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Private in-memory database. Every pooled connection to `:memory:` is a
    /// separate database, so the pool is pinned to a single connection.
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::connection(format!("Invalid SQLite path: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::connection(format!("Failed to connect to SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        // Raw event log; schema only, nothing writes to it.
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS whiteboard_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::migration(format!("Failed to create events table: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS whiteboard_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL UNIQUE,
                snapshot_data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::migration(format!("Failed to create snapshots table: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::migration(format!("Failed to create chat table: {e}")))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_whiteboard_events_room ON whiteboard_events(room_id)",
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_room ON chat_messages(room_id, id)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::migration(format!("Failed to create index: {e}")))?;
        }

        Ok(())
    }
}

fn decode_err(e: sqlx::Error) -> StoreError {
    StoreError::database(format!("Invalid row: {e}"))
}

fn snapshot_from_row(row: &SqliteRow) -> Result<Snapshot, StoreError> {
    Ok(Snapshot {
        room_id: row.try_get("room_id").map_err(decode_err)?,
        image_data: row.try_get("snapshot_data").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
    })
}

fn chat_message_from_row(row: &SqliteRow) -> Result<ChatMessage, StoreError> {
    Ok(ChatMessage {
        room_id: row.try_get("room_id").map_err(decode_err)?,
        user: row.try_get("user_name").map_err(decode_err)?,
        text: row.try_get("text").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_snapshot(&self, room_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT room_id, snapshot_data, updated_at FROM whiteboard_snapshots WHERE room_id = ?1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to load snapshot: {e}")))?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn upsert_snapshot(&self, room_id: &str, image_data: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO whiteboard_snapshots (room_id, snapshot_data, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(room_id) DO UPDATE SET
                snapshot_data = excluded.snapshot_data,
                updated_at = excluded.updated_at
            ",
        )
        .bind(room_id)
        .bind(image_data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to save snapshot: {e}")))?;

        debug!("Snapshot stored for room {room_id} ({} bytes)", image_data.len());
        Ok(())
    }

    async fn append_chat_message(
        &self,
        room_id: &str,
        user: &str,
        text: &str,
    ) -> Result<ChatMessage, StoreError> {
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO chat_messages (room_id, user_name, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(room_id)
        .bind(user)
        .bind(text)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to append chat message: {e}")))?;

        Ok(ChatMessage {
            room_id: room_id.to_string(),
            user: user.to_string(),
            text: text.to_string(),
            created_at,
        })
    }

    async fn chat_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        // Row ids follow insertion order, which is the authoritative chat order.
        let rows = sqlx::query(
            r"
            SELECT room_id, user_name, text, created_at
            FROM chat_messages
            WHERE room_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("Failed to load chat history: {e}")))?;

        rows.iter().map(chat_message_from_row).collect()
    }
}

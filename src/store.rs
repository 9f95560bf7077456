use crate::{
    chat::{ChatMessage, Dialog},
    entity::{ConversationKey, UserId},
    error::ChatResult,
};
use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow},
    ConnectOptions, Row, SqlitePool,
};
use std::{path::Path, str::FromStr, time::Duration};

/// Durable log of chat messages and dialog markers.
///
/// Every write is its own statement; nothing here spans a transaction across
/// several writes.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                from_id INTEGER NOT NULL,
                to_id INTEGER NOT NULL,
                listing_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_pair_created
                ON messages(from_id, to_id, listing_id, created_at);

            CREATE TABLE IF NOT EXISTS dialogs (
                id1 INTEGER NOT NULL,
                id2 INTEGER NOT NULL,
                listing_id INTEGER NOT NULL,
                created_at DATETIME NOT NULL,
                PRIMARY KEY (id1, id2, listing_id)
            );
            CREATE INDEX IF NOT EXISTS idx_dialogs_owner_created
                ON dialogs(id1, created_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    pub async fn insert_message(&self, msg: &ChatMessage) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, from_id, to_id, listing_id, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(msg.from.0)
        .bind(msg.to.0)
        .bind(msg.listing)
        .bind(&msg.body)
        .bind(msg.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// One page of the conversation between the pair of `key` about its
    /// listing, both directions, oldest first.
    pub async fn select_messages(
        &self,
        key: ConversationKey,
        offset: i64,
        limit: i64,
    ) -> ChatResult<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_id, to_id, listing_id, body, created_at
            FROM messages
            WHERE listing_id = ?
              AND ((from_id = ? AND to_id = ?) OR (from_id = ? AND to_id = ?))
            ORDER BY created_at ASC, rowid ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(key.listing)
        .bind(key.from.0)
        .bind(key.to.0)
        .bind(key.to.0)
        .bind(key.from.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Number of messages written in the direction of `key` only.
    pub async fn count_messages_from(&self, key: ConversationKey) -> ChatResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE from_id = ? AND to_id = ? AND listing_id = ?",
        )
        .bind(key.from.0)
        .bind(key.to.0)
        .bind(key.listing)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Delete the message log of the pair about the listing, both directions.
    pub async fn delete_messages(&self, key: ConversationKey) -> ChatResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE listing_id = ?
              AND ((from_id = ? AND to_id = ?) OR (from_id = ? AND to_id = ?))
            "#,
        )
        .bind(key.listing)
        .bind(key.from.0)
        .bind(key.to.0)
        .bind(key.to.0)
        .bind(key.from.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn select_dialog(&self, key: ConversationKey) -> ChatResult<Option<Dialog>> {
        let row = sqlx::query(
            r#"
            SELECT id1, id2, listing_id, created_at
            FROM dialogs
            WHERE id1 = ? AND id2 = ? AND listing_id = ?
            "#,
        )
        .bind(key.from.0)
        .bind(key.to.0)
        .bind(key.listing)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(dialog_from_row).transpose()?)
    }

    /// Insert a dialog marker. A marker that already exists is left untouched.
    pub async fn insert_dialog(&self, dialog: &Dialog) -> ChatResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO dialogs (id1, id2, listing_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(dialog.id1.0)
        .bind(dialog.id2.0)
        .bind(dialog.listing_id)
        .bind(dialog.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_dialog(&self, key: ConversationKey) -> ChatResult<bool> {
        let result = sqlx::query("DELETE FROM dialogs WHERE id1 = ? AND id2 = ? AND listing_id = ?")
            .bind(key.from.0)
            .bind(key.to.0)
            .bind(key.listing)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All dialogs owned by `user`, most recent first.
    pub async fn select_all_dialogs(&self, user: UserId) -> ChatResult<Vec<Dialog>> {
        let rows = sqlx::query(
            r#"
            SELECT id1, id2, listing_id, created_at
            FROM dialogs
            WHERE id1 = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(dialog_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage, sqlx::Error> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        from: UserId(row.try_get("from_id")?),
        to: UserId(row.try_get("to_id")?),
        listing: row.try_get("listing_id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

fn dialog_from_row(row: &SqliteRow) -> Result<Dialog, sqlx::Error> {
    Ok(Dialog {
        id1: UserId(row.try_get("id1")?),
        id2: UserId(row.try_get("id2")?),
        listing_id: row.try_get("listing_id")?,
        created_at: row.try_get("created_at")?,
    })
}

//! Single-document notes store.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::storage::StoreFuture;
use crate::storage::error::StoreResult;

/// Notes document storage. Last write wins.
pub trait NotesRepository: Send + Sync {
    /// Current document, empty when never saved.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load(&self) -> StoreFuture<'_, StoreResult<String>>;

    /// Replace the document.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn save(&self, content: String) -> StoreFuture<'_, StoreResult<()>>;
}

/// `SQLite` implementation of notes storage.
pub struct SqliteNotesStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteNotesStore {
    /// Table name for notes.
    pub const DEFAULT_TABLE: &'static str = "notes";

    /// Initialize the store and create the table if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>) -> StoreResult<Self> {
        let table = Self::DEFAULT_TABLE.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    content TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl NotesRepository for SqliteNotesStore {
    fn load(&self) -> StoreFuture<'_, StoreResult<String>> {
        Box::pin(async move {
            let table = self.table.clone();
            let content = self
                .conn
                .call(move |conn| {
                    let content = conn
                        .query_row(
                            &format!("SELECT content FROM {table} WHERE id = 1"),
                            [],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(content)
                })
                .await?;
            Ok(content.unwrap_or_default())
        })
    }

    fn save(&self, content: String) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let now_ms = chrono::Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, content, updated_at) VALUES (1, ?1, ?2)
                             ON CONFLICT(id) DO UPDATE SET
                                content = excluded.content,
                                updated_at = excluded.updated_at"
                        ),
                        rusqlite::params![content, now_ms],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

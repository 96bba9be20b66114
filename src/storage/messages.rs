//! Message history store.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::chat::ids::CorrelationToken;
use crate::chat::types::{Message, MessageId, Page, Role};
use crate::storage::StoreFuture;
use crate::storage::error::{StoreError, StoreResult};

/// A message about to be persisted.
#[derive(Clone, Debug)]
pub struct NewMessage {
    /// Author.
    pub role: Role,
    /// Text.
    pub content: String,
    /// Token of the exchange, echoed back on reads.
    pub client_token: Option<CorrelationToken>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// Message stamped with the current time.
    #[must_use]
    pub fn now(role: Role, content: impl Into<String>, client_token: Option<CorrelationToken>) -> Self {
        Self {
            role,
            content: content.into(),
            client_token,
            created_at: Utc::now(),
        }
    }
}

/// Message history storage.
pub trait MessageRepository: Send + Sync {
    /// Persist a message and return it with its assigned id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append(&self, message: NewMessage) -> StoreFuture<'_, StoreResult<Message>>;

    /// Read one page, page 1 being the newest slice.
    ///
    /// Messages within the page ascend by creation. A page beyond the last is
    /// clamped to the last.
    ///
    /// # Errors
    /// Returns an error if storage access fails or `page_size` is zero.
    fn page(&self, page: u32, page_size: u32) -> StoreFuture<'_, StoreResult<Page>>;

    /// The most recent `limit` messages, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn recent(&self, limit: usize) -> StoreFuture<'_, StoreResult<Vec<Message>>>;

    /// Delete every message. Returns how many were removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn clear(&self) -> StoreFuture<'_, StoreResult<u64>>;
}

type RawRow = (i64, String, String, Option<String>, i64);

/// `SQLite` implementation of message storage.
pub struct SqliteMessageStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteMessageStore {
    /// Table name for messages.
    pub const DEFAULT_TABLE: &'static str = "messages";

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
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    client_token TEXT,
                    created_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

fn decode_row((id, role, content, token, ts): RawRow) -> StoreResult<Message> {
    let created_at = Utc
        .timestamp_millis_opt(ts)
        .single()
        .ok_or_else(|| StoreError::InvalidRow(format!("invalid timestamp {ts}")))?;
    let role = Role::from_str(&role).map_err(StoreError::InvalidRow)?;
    let client_token = token
        .map(|t| CorrelationToken::from_str(&t))
        .transpose()
        .map_err(|err| StoreError::InvalidRow(format!("invalid client token: {err}")))?;
    Ok(Message {
        id: MessageId(id),
        role,
        content,
        created_at,
        client_token,
    })
}

fn map_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

/// Number of pages for `total` rows, zero for an empty history.
fn page_count(total: u64, page_size: u32) -> u64 {
    total.div_ceil(u64::from(page_size))
}

impl MessageRepository for SqliteMessageStore {
    fn append(&self, message: NewMessage) -> StoreFuture<'_, StoreResult<Message>> {
        Box::pin(async move {
            let table = self.table.clone();
            let role = message.role.as_str();
            let content = message.content.clone();
            let token = message.client_token.map(|t| t.to_string());
            let ts = message.created_at.timestamp_millis();
            let id = self
                .conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (role, content, client_token, created_at)
                             VALUES (?1, ?2, ?3, ?4)"
                        ),
                        rusqlite::params![role, content, token, ts],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await?;

            decode_row((
                id,
                message.role.as_str().to_string(),
                message.content,
                message.client_token.map(|t| t.to_string()),
                ts,
            ))
        })
    }

    fn page(&self, page: u32, page_size: u32) -> StoreFuture<'_, StoreResult<Page>> {
        Box::pin(async move {
            if page_size == 0 {
                return Err(StoreError::InvalidArgument(
                    "page_size must be > 0".to_string(),
                ));
            }
            let table = self.table.clone();
            let (total, mut rows) = self
                .conn
                .call(move |conn| {
                    let total: i64 =
                        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                            row.get(0)
                        })?;
                    let total = u64::try_from(total).unwrap_or_default();
                    let pages = page_count(total, page_size).max(1);
                    let index = u64::from(page).clamp(1, pages);
                    let offset = i64::try_from((index - 1) * u64::from(page_size))
                        .unwrap_or(i64::MAX);

                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, role, content, client_token, created_at
                         FROM {table}
                         ORDER BY id DESC
                         LIMIT ?1 OFFSET ?2"
                    ))?;
                    let rows = stmt
                        .query_map(
                            rusqlite::params![i64::from(page_size), offset],
                            map_raw,
                        )?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok((total, rows))
                })
                .await?;

            rows.reverse();
            let messages = rows
                .into_iter()
                .map(decode_row)
                .collect::<StoreResult<Vec<_>>>()?;
            let total_pages = u32::try_from(page_count(total, page_size))
                .map_err(|_| StoreError::InvalidArgument("page count exceeds u32".to_string()))?;
            Ok(Page {
                messages,
                total,
                total_pages,
            })
        })
    }

    fn recent(&self, limit: usize) -> StoreFuture<'_, StoreResult<Vec<Message>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let limit = i64::try_from(limit)
                .map_err(|_| StoreError::InvalidArgument("limit exceeds i64".to_string()))?;
            let mut rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, role, content, client_token, created_at
                         FROM {table}
                         ORDER BY id DESC
                         LIMIT ?1"
                    ))?;
                    let rows = stmt
                        .query_map([limit], map_raw)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.reverse();
            rows.into_iter().map(decode_row).collect()
        })
    }

    fn clear(&self) -> StoreFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let table = self.table.clone();
            let removed = self
                .conn
                .call(move |conn| Ok(conn.execute(&format!("DELETE FROM {table}"), [])?))
                .await?;
            Ok(removed as u64)
        })
    }
}

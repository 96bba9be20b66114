//! Durable storage for the assistant service.
//!
//! Messages and the notes document live in one `SQLite` database accessed
//! through `tokio-rusqlite`. Repositories are traits so the HTTP layer can be
//! exercised against an in-memory connection.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tokio_rusqlite::Connection;

pub mod error;
pub mod messages;
pub mod notes;

pub use error::{StoreError, StoreResult};
pub use messages::{MessageRepository, NewMessage, SqliteMessageStore};
pub use notes::{NotesRepository, SqliteNotesStore};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Open (or create) the database file.
///
/// # Errors
/// Returns an error if the database cannot be opened.
pub async fn open_database(path: impl AsRef<Path>) -> StoreResult<Arc<Connection>> {
    let conn = Connection::open(path.as_ref()).await?;
    conn.call(|conn| {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(%mode, "sqlite journal mode");
        Ok(())
    })
    .await?;
    Ok(Arc::new(conn))
}

/// Open a private in-memory database.
///
/// # Errors
/// Returns an error if the connection cannot be created.
pub async fn open_in_memory() -> StoreResult<Arc<Connection>> {
    Ok(Arc::new(Connection::open_in_memory().await?))
}

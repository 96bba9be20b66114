//! Error types for the backing store.

use thiserror::Error;

/// Storage error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// A stored row could not be decoded.
    #[error("invalid row: {0}")]
    InvalidRow(String),
    /// A caller-supplied value was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

//! Application state shared across all request handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::chat::types::Message;
use crate::llm::{OllamaGenerator, TextGenerator};
use crate::server::config::ServerConfig;
use crate::storage::{
    self, MessageRepository, NewMessage, NotesRepository, SqliteMessageStore, SqliteNotesStore,
    StoreResult,
};

/// Shared application state.
pub struct AppState {
    /// Message history.
    pub messages: Arc<dyn MessageRepository>,
    /// Notes document.
    pub notes: Arc<dyn NotesRepository>,
    /// Reply generator.
    pub generator: Arc<dyn TextGenerator>,
    /// Active configuration.
    pub config: ServerConfig,
    clear_epoch: AtomicU64,
    /// Serializes epoch-checked writes against history clears.
    history_lock: Mutex<()>,
}

impl AppState {
    /// Assemble state from existing components.
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        notes: Arc<dyn NotesRepository>,
        generator: Arc<dyn TextGenerator>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            messages,
            notes,
            generator,
            config,
            clear_epoch: AtomicU64::new(0),
            history_lock: Mutex::new(()),
        })
    }

    /// Open the database and the Ollama client described by `config`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the database cannot
    /// be opened or the HTTP client cannot be built.
    pub async fn open(
        config: ServerConfig,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        config.validate()?;
        let conn = storage::open_database(&config.sqlite_path).await?;
        let messages = SqliteMessageStore::new(conn.clone()).await?;
        let notes = SqliteNotesStore::new(conn).await?;
        let generator = OllamaGenerator::new(config.ollama_settings())
            .map_err(|e| format!("Failed to create Ollama client: {e}"))?;

        Ok(Self::new(
            Arc::new(messages),
            Arc::new(notes),
            Arc::new(generator),
            config,
        ))
    }

    /// Current clear epoch.
    #[must_use]
    pub fn clear_epoch(&self) -> u64 {
        self.clear_epoch.load(Ordering::SeqCst)
    }

    /// Start a new epoch. Replies begun under an older epoch are not persisted.
    pub fn bump_clear_epoch(&self) -> u64 {
        self.clear_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store the user message of a new exchange and return the epoch it
    /// belongs to.
    ///
    /// # Errors
    /// Returns an error if the message cannot be stored.
    pub async fn open_exchange(&self, message: NewMessage) -> StoreResult<u64> {
        let _guard = self.history_lock.lock().await;
        let epoch = self.clear_epoch();
        self.messages.append(message).await?;
        Ok(epoch)
    }

    /// Store a reply unless history was cleared after `epoch`.
    ///
    /// Returns `None` when the reply was dropped.
    ///
    /// # Errors
    /// Returns an error if the message cannot be stored.
    pub async fn append_if_current(
        &self,
        epoch: u64,
        message: NewMessage,
    ) -> StoreResult<Option<Message>> {
        let _guard = self.history_lock.lock().await;
        if self.clear_epoch() != epoch {
            return Ok(None);
        }
        self.messages.append(message).await.map(Some)
    }

    /// Delete all history and start a new epoch. Returns the new epoch and
    /// the number of deleted messages.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn clear_history(&self) -> StoreResult<(u64, u64)> {
        let _guard = self.history_lock.lock().await;
        let epoch = self.bump_clear_epoch();
        let deleted = self.messages.clear().await?;
        Ok((epoch, deleted))
    }
}

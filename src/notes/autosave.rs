//! Background autosave worker for the notes document.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chat::transport::NotesBackend;
use crate::notes::debounce::Debouncer;

/// Save state of the notes document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SaveStatus {
    /// Nothing edited yet.
    Idle,
    /// Edited, waiting for the quiet window.
    Dirty,
    /// Write in progress.
    Saving,
    /// Last write succeeded.
    Saved,
    /// Last write failed; the next edit retries.
    Failed(String),
}

enum Command {
    Edit(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to a running autosave worker.
///
/// Dropping the handle (or calling [`Self::shutdown`]) flushes any pending
/// edit before the worker exits.
pub struct NotesAutosave {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SaveStatus>,
    handle: JoinHandle<()>,
}

impl NotesAutosave {
    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(backend: Arc<dyn NotesBackend>, quiet: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SaveStatus::Idle);
        let worker = Worker {
            backend,
            debouncer: Debouncer::new(quiet),
            status: status_tx,
        };
        let handle = tokio::spawn(worker.run(rx));
        Self {
            commands,
            status,
            handle,
        }
    }

    /// Record an edit. Returns `false` if the worker has stopped.
    pub fn edit(&self, content: impl Into<String>) -> bool {
        self.commands.send(Command::Edit(content.into())).is_ok()
    }

    /// Write any pending edit now and wait for it.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Save status updates.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }

    /// Flush and stop the worker.
    pub async fn shutdown(self) {
        let Self {
            commands, handle, ..
        } = self;
        drop(commands);
        if let Err(err) = handle.await {
            warn!(%err, "notes autosave worker panicked");
        }
    }
}

struct Worker {
    backend: Arc<dyn NotesBackend>,
    debouncer: Debouncer,
    status: watch::Sender<SaveStatus>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("notes autosave worker started");
        loop {
            let deadline = self.debouncer.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Edit(content)) => {
                        self.debouncer.edit(content, Instant::now());
                        self.status.send_replace(SaveStatus::Dirty);
                    }
                    Some(Command::Flush(ack)) => {
                        if let Some(content) = self.debouncer.flush() {
                            self.save(content).await;
                        }
                        let _ = ack.send(());
                    }
                    None => {
                        if let Some(content) = self.debouncer.flush() {
                            self.save(content).await;
                        }
                        info!("notes autosave worker shutting down");
                        break;
                    }
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(content) = self.debouncer.take_due(Instant::now()) {
                        self.save(content).await;
                    }
                }
            }
        }
    }

    async fn save(&self, content: String) {
        self.status.send_replace(SaveStatus::Saving);
        match self.backend.save_notes(content).await {
            Ok(()) => {
                debug!("notes saved");
                self.status.send_replace(SaveStatus::Saved);
            }
            Err(err) => {
                warn!(%err, "notes autosave failed");
                self.status.send_replace(SaveStatus::Failed(err.to_string()));
            }
        }
    }
}

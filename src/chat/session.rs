//! Async driver wiring the controller to a transport.
//!
//! `ChatSession` is cheap to clone. Every controller mutation is followed by
//! a fresh [`ConversationView`] on the watch channel, so renderers never see
//! the ledger or cache directly.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{Mutex, MutexGuard, broadcast, watch};
use tracing::{debug, info, warn};

use crate::chat::config::ClientConfig;
use crate::chat::controller::{
    ConversationController, ConversationView, Cue, Outbound, Phase, SendRejected, StreamProgress,
};
use crate::chat::error::{ChatError, ChatResult};
use crate::chat::transport::ChatTransport;

/// Capacity of the cue channel.
const CUE_CHANNEL_CAPACITY: usize = 32;

/// How a send ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// The reply completed.
    Completed,
    /// The send was not accepted; nothing changed.
    Rejected(SendRejected),
    /// The user cancelled; the user entry was rolled back.
    Cancelled,
    /// History was cleared mid-exchange; the reply was discarded.
    Abandoned,
}

struct Inner {
    transport: Arc<dyn ChatTransport>,
    controller: Mutex<ConversationController>,
    view_tx: watch::Sender<ConversationView>,
    cue_tx: broadcast::Sender<Cue>,
    /// Bumped by every cancel request. A send watches for bumps made after it
    /// started.
    cancel: watch::Sender<u64>,
    idle_timeout: Duration,
}

/// Conversation bound to one transport.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Create a session. Nothing is fetched until [`Self::refresh_page`].
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>, config: &ClientConfig) -> Self {
        let capacity = NonZeroUsize::new(config.page_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let controller = ConversationController::new(capacity);
        let (view_tx, _) = watch::channel(controller.view());
        let (cue_tx, _) = broadcast::channel(CUE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                controller: Mutex::new(controller),
                view_tx,
                cue_tx,
                cancel: watch::channel(0).0,
                idle_timeout: config.stream_idle_timeout,
            }),
        }
    }

    /// Receive a snapshot after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.inner.view_tx.subscribe()
    }

    /// Receive cue edges.
    #[must_use]
    pub fn cues(&self) -> broadcast::Receiver<Cue> {
        self.inner.cue_tx.subscribe()
    }

    /// Latest snapshot.
    #[must_use]
    pub fn view(&self) -> ConversationView {
        self.inner.view_tx.borrow().clone()
    }

    /// Replace the input buffer.
    pub async fn set_input(&self, text: impl Into<String>) {
        let mut ctl = self.lock().await;
        ctl.set_input(text);
        self.publish(&mut ctl);
    }

    /// Send the input buffer and drive the reply to its end.
    ///
    /// # Errors
    ///
    /// Returns the transport failure that ended the exchange. The user entry
    /// has already been rolled back when this happens.
    pub async fn send(&self) -> ChatResult<SendOutcome> {
        // Subscribed before taking the lock so a cancel issued while this
        // call waits on it or submits still counts.
        let mut cancel_rx = self.inner.cancel.subscribe();
        let outbound = {
            let mut ctl = self.lock().await;
            let submitted = ctl.submit(Utc::now());
            self.publish(&mut ctl);
            match submitted {
                Ok(outbound) => outbound,
                Err(rejected) => return Ok(SendOutcome::Rejected(rejected)),
            }
        };
        let ticket = outbound.ticket;

        let cancelled = async move {
            let _ = cancel_rx.changed().await;
        };
        let result = tokio::select! {
            res = self.run_exchange(outbound) => res,
            () = cancelled => Err(ChatError::Cancelled),
        };

        match result {
            Ok(StreamProgress::Completed) => {
                if let Err(err) = self.refresh_page(1).await {
                    warn!(%err, "failed to refresh latest page after reply");
                }
                Ok(SendOutcome::Completed)
            }
            Ok(StreamProgress::Failed) => Err(ChatError::PrematureClose),
            Ok(StreamProgress::Continue | StreamProgress::Stale) => Ok(SendOutcome::Abandoned),
            Err(ChatError::Cancelled) => {
                let mut ctl = self.lock().await;
                let aborted = ctl.abort(ticket);
                self.publish(&mut ctl);
                Ok(if aborted {
                    SendOutcome::Cancelled
                } else {
                    SendOutcome::Abandoned
                })
            }
            Err(err) => {
                let mut ctl = self.lock().await;
                if !ctl.is_current(ticket) {
                    debug!(%err, "error from abandoned exchange");
                    return Ok(SendOutcome::Abandoned);
                }
                ctl.on_transport_error(ticket, &err);
                self.publish(&mut ctl);
                Err(err)
            }
        }
    }

    async fn run_exchange(&self, outbound: Outbound) -> ChatResult<StreamProgress> {
        let ticket = outbound.ticket;
        let mut body = self.inner.transport.open_stream(outbound.request).await?;
        {
            let mut ctl = self.lock().await;
            if !ctl.on_stream_opened(ticket) {
                return Ok(StreamProgress::Stale);
            }
            self.publish(&mut ctl);
        }

        let idle = self.inner.idle_timeout;
        loop {
            let next = tokio::time::timeout(idle, body.next())
                .await
                .map_err(|_| ChatError::IdleTimeout(idle))?;
            let mut ctl = self.lock().await;
            let progress = match next {
                Some(Ok(chunk)) => ctl.on_chunk(ticket, &chunk),
                Some(Err(err)) => return Err(err),
                None => ctl.on_stream_end(ticket),
            };
            self.publish(&mut ctl);
            if progress != StreamProgress::Continue {
                return Ok(progress);
            }
        }
    }

    /// Abort the exchange in flight, if any.
    pub fn cancel(&self) {
        self.request_cancel();
    }

    fn request_cancel(&self) {
        self.inner.cancel.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Select a page, fetching it when not cached. Returns the clamped index.
    ///
    /// # Errors
    ///
    /// Returns an error if the page had to be fetched and the fetch failed.
    pub async fn select_page(&self, page: u32) -> ChatResult<u32> {
        let (index, must_fetch) = {
            let mut ctl = self.lock().await;
            let selected = ctl.select_page(page);
            self.publish(&mut ctl);
            selected
        };
        if must_fetch {
            self.refresh_page(index).await
        } else {
            debug!(page = index, "page served from cache");
            Ok(index)
        }
    }

    /// Fetch a page regardless of the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails.
    pub async fn refresh_page(&self, page: u32) -> ChatResult<u32> {
        let epoch = self.lock().await.history_epoch();
        let fetched = self.inner.transport.fetch_page(page).await?;
        let mut ctl = self.lock().await;
        if ctl.history_epoch() != epoch {
            debug!(page, "dropping page fetched before history clear");
            return Ok(ctl.current_page());
        }
        let index = ctl.on_page_loaded(page, fetched);
        self.publish(&mut ctl);
        Ok(index)
    }

    /// Clear history locally and remotely, then reload page 1.
    ///
    /// Local state is reset first so no pending entry or cached page survives
    /// even if the remote call fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote clear or the reload fails.
    pub async fn clear_history(&self) -> ChatResult<()> {
        {
            let mut ctl = self.lock().await;
            ctl.on_history_cleared();
            self.publish(&mut ctl);
        }
        self.request_cancel();
        self.inner.transport.clear_history().await?;
        info!("history cleared");
        self.refresh_page(1).await?;
        Ok(())
    }

    async fn lock(&self) -> MutexGuard<'_, ConversationController> {
        self.inner.controller.lock().await
    }

    fn publish(&self, ctl: &mut ConversationController) {
        self.inner.view_tx.send_replace(ctl.view());
        for cue in ctl.drain_cues() {
            // No subscribers is fine.
            let _ = self.inner.cue_tx.send(cue);
        }
    }

    /// Whether an exchange is in flight.
    pub async fn is_busy(&self) -> bool {
        self.lock().await.phase() != Phase::Idle
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish_non_exhaustive()
    }
}

//! Conversation controller: the send/receive state machine.
//!
//! The controller performs no I/O. A driver (see [`crate::chat::session`])
//! calls [`ConversationController::submit`], forwards response chunks and
//! transport outcomes, and applies fetched pages. Every call that concerns an
//! exchange carries the [`ExchangeTicket`] issued by `submit`; calls with a
//! stale ticket are ignored, which is how an abandoned stream is fenced off.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::chat::accumulator::{AccumulatorOutput, StreamAccumulator};
use crate::chat::error::ChatError;
use crate::chat::frame::{FrameDecoder, StreamFrame};
use crate::chat::ids::{CorrelationToken, LocalId};
use crate::chat::ledger::OptimisticEntry;
use crate::chat::page_cache::PageTotals;
use crate::chat::reconcile::{Reconciler, ViewEntry};
use crate::chat::types::{Page, Role, SendRequest};

/// Identifies one send/stream cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ExchangeTicket(u64);

/// Lifecycle phase of the current exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// No exchange in flight.
    Idle,
    /// Request issued, response not yet open.
    Sending,
    /// Response open, frames arriving.
    Streaming,
}

/// User-visible status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChatStatus {
    /// Ready for input.
    Idle,
    /// A reply is being produced.
    Streaming,
    /// The last exchange failed; ready for input.
    Error(String),
}

/// Observational side effects at state edges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cue {
    /// Fired on `Idle -> Sending`.
    Sent,
    /// Fired on `Streaming -> Idle` after a completion.
    Received,
}

/// Why a send was not accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendRejected {
    /// Another exchange is in flight.
    Busy,
    /// Input is empty or whitespace.
    EmptyInput,
}

/// Result of feeding stream data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamProgress {
    /// Keep reading.
    Continue,
    /// The reply completed; page 1 is stale and must be refetched.
    Completed,
    /// The exchange failed and was rolled back.
    Failed,
    /// The ticket no longer matches the current exchange.
    Stale,
}

/// Request produced by an accepted send.
#[derive(Clone, Debug)]
pub struct Outbound {
    /// Ticket for all follow-up calls.
    pub ticket: ExchangeTicket,
    /// Body to post.
    pub request: SendRequest,
}

/// Immutable snapshot handed to the rendering layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationView {
    /// Rows for the selected page.
    pub entries: Vec<ViewEntry>,
    /// Live partial reply, only on page 1 while streaming.
    pub partial: Option<String>,
    /// Status line.
    pub status: ChatStatus,
    /// Selected page.
    pub page: u32,
    /// Totals from the store's last response.
    pub totals: Option<PageTotals>,
    /// Input buffer contents.
    pub input: String,
}

struct Exchange {
    ticket: ExchangeTicket,
    user_entry: LocalId,
    token: CorrelationToken,
}

/// Send/receive state machine.
pub struct ConversationController {
    input: String,
    phase: Phase,
    exchange: Option<Exchange>,
    reconciler: Reconciler,
    decoder: FrameDecoder,
    accumulator: StreamAccumulator,
    current_page: u32,
    last_error: Option<String>,
    next_ticket: u64,
    history_epoch: u64,
    cues: Vec<Cue>,
}

impl Default for ConversationController {
    fn default() -> Self {
        Self::with_reconciler(Reconciler::default())
    }
}

impl ConversationController {
    /// Create a controller whose page cache holds `capacity` pages.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_reconciler(Reconciler::new(capacity))
    }

    fn with_reconciler(reconciler: Reconciler) -> Self {
        Self {
            input: String::new(),
            phase: Phase::Idle,
            exchange: None,
            reconciler,
            decoder: FrameDecoder::new(),
            accumulator: StreamAccumulator::new(),
            current_page: 1,
            last_error: None,
            next_ticket: 0,
            history_epoch: 0,
            cues: Vec::new(),
        }
    }

    /// Replace the input buffer.
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Current input buffer.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Selected page.
    #[must_use]
    pub const fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Bumped by every history clear. A page fetched under an older epoch
    /// must not be applied.
    #[must_use]
    pub const fn history_epoch(&self) -> u64 {
        self.history_epoch
    }

    /// Whether `ticket` is the exchange in flight.
    #[must_use]
    pub fn is_current(&self, ticket: ExchangeTicket) -> bool {
        self.exchange.as_ref().is_some_and(|e| e.ticket == ticket)
    }

    /// Accept the input buffer as a new exchange.
    ///
    /// On success the user entry is already visible as pending and the input
    /// buffer is empty. A rejected send changes nothing.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<Outbound, SendRejected> {
        if self.phase != Phase::Idle {
            debug!("send rejected: exchange in flight");
            return Err(SendRejected::Busy);
        }
        let message = self.input.trim().to_string();
        if message.is_empty() {
            return Err(SendRejected::EmptyInput);
        }

        self.next_ticket += 1;
        let ticket = ExchangeTicket(self.next_ticket);
        let token = CorrelationToken::new();
        let user_entry = self.reconciler.append(OptimisticEntry::new(
            Role::User,
            message.clone(),
            now,
            Some(token),
        ));

        self.input.clear();
        self.last_error = None;
        self.decoder.reset();
        self.accumulator.begin();
        self.exchange = Some(Exchange {
            ticket,
            user_entry,
            token,
        });
        self.phase = Phase::Sending;
        self.cues.push(Cue::Sent);

        Ok(Outbound {
            ticket,
            request: SendRequest {
                message,
                client_token: Some(token),
            },
        })
    }

    /// The response opened successfully.
    pub fn on_stream_opened(&mut self, ticket: ExchangeTicket) -> bool {
        if !self.is_current(ticket) || self.phase != Phase::Sending {
            return false;
        }
        self.phase = Phase::Streaming;
        true
    }

    /// Feed one chunk of the response body.
    pub fn on_chunk(&mut self, ticket: ExchangeTicket, chunk: &[u8]) -> StreamProgress {
        if !self.is_current(ticket) {
            return StreamProgress::Stale;
        }
        if self.phase == Phase::Sending {
            self.phase = Phase::Streaming;
        }
        let frames: Vec<_> = self.decoder.decode(chunk).collect();
        self.apply_frames(frames)
    }

    /// The body ended. Without a completion frame this is a premature close.
    pub fn on_stream_end(&mut self, ticket: ExchangeTicket) -> StreamProgress {
        if !self.is_current(ticket) {
            return StreamProgress::Stale;
        }
        let frames: Vec<_> = self.decoder.finish().collect();
        match self.apply_frames(frames) {
            StreamProgress::Continue => {
                self.fail(&ChatError::PrematureClose);
                StreamProgress::Failed
            }
            other => other,
        }
    }

    /// A transport failure ended the exchange: roll back the user entry.
    pub fn on_transport_error(&mut self, ticket: ExchangeTicket, err: &ChatError) {
        if self.is_current(ticket) {
            self.fail(err);
        }
    }

    /// Abort the exchange locally. The page cache is left untouched.
    pub fn abort(&mut self, ticket: ExchangeTicket) -> bool {
        let Some(exchange) = self.exchange.take().filter(|e| e.ticket == ticket) else {
            return false;
        };
        self.reconciler.rollback(exchange.user_entry);
        self.accumulator.reset();
        self.decoder.reset();
        self.phase = Phase::Idle;
        info!("exchange aborted");
        true
    }

    /// Apply a fetched page.
    pub fn on_page_loaded(&mut self, requested: u32, page: Page) -> u32 {
        let index = self.reconciler.apply_page(requested, page);
        if self.current_page == requested && index != requested {
            self.current_page = index;
        }
        if index == 1 && self.phase == Phase::Idle && !self.reconciler.pending().is_empty() {
            warn!(
                pending = self.reconciler.pending().len(),
                "refreshed history did not confirm all optimistic entries"
            );
        }
        index
    }

    /// Select a page. Returns the clamped index and whether it must be fetched.
    pub fn select_page(&mut self, requested: u32) -> (u32, bool) {
        let index = self.reconciler.clamp_page(requested);
        self.current_page = index;
        (index, !self.reconciler.has_page(index))
    }

    /// Local half of a history clear.
    ///
    /// Pending entries, cached pages and the in-flight exchange are dropped;
    /// a completion arriving later for the abandoned exchange is ignored.
    pub fn on_history_cleared(&mut self) {
        if self.exchange.take().is_some() {
            info!("abandoning in-flight exchange for history clear");
        }
        self.history_epoch += 1;
        self.reconciler.clear();
        self.accumulator.reset();
        self.decoder.reset();
        self.phase = Phase::Idle;
        self.current_page = 1;
    }

    /// Take the cue edges fired since the last call.
    pub fn drain_cues(&mut self) -> Vec<Cue> {
        std::mem::take(&mut self.cues)
    }

    /// User-visible status.
    #[must_use]
    pub fn status(&self) -> ChatStatus {
        match (self.phase, &self.last_error) {
            (Phase::Sending | Phase::Streaming, _) => ChatStatus::Streaming,
            (Phase::Idle, Some(err)) => ChatStatus::Error(err.clone()),
            (Phase::Idle, None) => ChatStatus::Idle,
        }
    }

    /// Snapshot for rendering.
    #[must_use]
    pub fn view(&self) -> ConversationView {
        let partial = (self.current_page == 1 && self.phase == Phase::Streaming)
            .then(|| self.accumulator.partial().to_string());
        ConversationView {
            entries: self.reconciler.view(self.current_page),
            partial,
            status: self.status(),
            page: self.current_page,
            totals: self.reconciler.totals(),
            input: self.input.clone(),
        }
    }

    fn apply_frames(&mut self, frames: Vec<StreamFrame>) -> StreamProgress {
        for frame in frames {
            for output in self.accumulator.push(frame) {
                if let AccumulatorOutput::Complete(content) = output {
                    self.complete(content);
                    return StreamProgress::Completed;
                }
            }
        }
        StreamProgress::Continue
    }

    fn complete(&mut self, content: String) {
        let Some(exchange) = self.exchange.take() else {
            return;
        };
        self.reconciler.append(OptimisticEntry::new(
            Role::Assistant,
            content,
            Utc::now(),
            Some(exchange.token),
        ));
        self.reconciler.invalidate_latest();
        self.decoder.reset();
        self.phase = Phase::Idle;
        self.cues.push(Cue::Received);
    }

    fn fail(&mut self, err: &ChatError) {
        let Some(exchange) = self.exchange.take() else {
            return;
        };
        warn!(%err, "exchange failed");
        self.reconciler.rollback(exchange.user_entry);
        self.accumulator.reset();
        self.decoder.reset();
        self.last_error = Some(err.to_string());
        self.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{Message, MessageId};

    const HI_THERE: &[u8] =
        b"data: {\"content\":\"Hi\"}\ndata: {\"content\":\" there\"}\ndata: {\"done\":true}\n";

    fn confirmed(id: i64, role: Role, content: &str) -> Message {
        Message {
            id: MessageId(id),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            client_token: None,
        }
    }

    fn send(ctl: &mut ConversationController, text: &str) -> Outbound {
        ctl.set_input(text);
        ctl.submit(Utc::now()).unwrap()
    }

    #[test]
    fn test_hello_scenario() {
        let mut ctl = ConversationController::default();
        ctl.on_page_loaded(1, Page::default());
        let out = send(&mut ctl, "Hello");
        assert_eq!(out.request.message, "Hello");
        assert!(ctl.input().is_empty());
        assert_eq!(ctl.drain_cues(), vec![Cue::Sent]);

        assert!(ctl.on_stream_opened(out.ticket));
        assert_eq!(
            ctl.on_chunk(out.ticket, b"data: {\"content\":\"Hi\"}\n"),
            StreamProgress::Continue
        );
        assert_eq!(ctl.view().partial.as_deref(), Some("Hi"));
        assert_eq!(
            ctl.on_chunk(out.ticket, b"data: {\"content\":\" there\"}\n"),
            StreamProgress::Continue
        );
        assert_eq!(ctl.view().partial.as_deref(), Some("Hi there"));
        assert_eq!(
            ctl.on_chunk(out.ticket, b"data: {\"done\":true}\n"),
            StreamProgress::Completed
        );
        assert_eq!(ctl.drain_cues(), vec![Cue::Received]);
        assert_eq!(ctl.phase(), Phase::Idle);

        let view = ctl.view();
        let pending: Vec<_> = view
            .entries
            .iter()
            .filter(|e| e.is_pending())
            .map(|e| (e.role(), e.content().to_string()))
            .collect();
        assert_eq!(
            pending,
            vec![
                (Role::User, "Hello".to_string()),
                (Role::Assistant, "Hi there".to_string()),
            ]
        );

        let (_, must_fetch) = ctl.select_page(1);
        assert!(must_fetch);
        ctl.on_page_loaded(
            1,
            Page {
                messages: vec![
                    confirmed(1, Role::User, "Hello"),
                    confirmed(2, Role::Assistant, "Hi there"),
                ],
                total: 2,
                total_pages: 1,
            },
        );
        let view = ctl.view();
        assert_eq!(view.entries.len(), 2);
        assert!(view.entries.iter().all(|e| !e.is_pending()));
        assert_eq!(view.entries[0].content(), "Hello");
        assert_eq!(view.entries[1].content(), "Hi there");
    }

    #[test]
    fn test_confirmed_history_survives_completion() {
        let mut ctl = ConversationController::default();
        ctl.on_page_loaded(
            1,
            Page {
                messages: vec![confirmed(1, Role::User, "old")],
                total: 1,
                total_pages: 1,
            },
        );
        let out = send(&mut ctl, "Hello");
        assert_eq!(
            ctl.on_chunk(out.ticket, b"data: {\"content\":\"Hi\"}\ndata: {\"done\":true}\n"),
            StreamProgress::Completed
        );

        let rows = |ctl: &ConversationController| -> Vec<(String, bool)> {
            ctl.view()
                .entries
                .iter()
                .map(|e| (e.content().to_string(), e.is_pending()))
                .collect()
        };
        let expected = vec![
            ("old".to_string(), false),
            ("Hello".to_string(), true),
            ("Hi".to_string(), true),
        ];
        assert_eq!(rows(&ctl), expected);

        // Refetch is due, but until it lands nothing disappears.
        assert_eq!(ctl.select_page(1), (1, true));
        assert_eq!(rows(&ctl), expected);
    }

    #[test]
    fn test_send_while_streaming_is_rejected() {
        let mut ctl = ConversationController::default();
        let out = send(&mut ctl, "first");
        ctl.on_stream_opened(out.ticket);
        ctl.set_input("second");
        let before = ctl.view().entries.len();

        assert_eq!(ctl.submit(Utc::now()).unwrap_err(), SendRejected::Busy);
        assert_eq!(ctl.input(), "second");
        assert_eq!(ctl.view().entries.len(), before);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let mut ctl = ConversationController::default();
        ctl.set_input("   ");
        assert_eq!(ctl.submit(Utc::now()).unwrap_err(), SendRejected::EmptyInput);
        assert_eq!(ctl.phase(), Phase::Idle);
        assert!(ctl.drain_cues().is_empty());
    }

    #[test]
    fn test_transport_error_rolls_back_only_that_turn() {
        let mut ctl = ConversationController::default();
        let first = send(&mut ctl, "kept");
        ctl.on_chunk(first.ticket, HI_THERE);
        let ledger_before = ctl.view().entries.len();
        assert_eq!(ledger_before, 2);

        let second = send(&mut ctl, "doomed");
        ctl.on_stream_opened(second.ticket);
        ctl.on_chunk(second.ticket, b"data: {\"content\":\"par\"}\n");
        ctl.on_transport_error(second.ticket, &ChatError::PrematureClose);

        let view = ctl.view();
        assert_eq!(view.entries.len(), ledger_before);
        assert!(view.entries.iter().all(|e| e.content() != "doomed"));
        assert!(matches!(view.status, ChatStatus::Error(_)));
        assert_eq!(ctl.phase(), Phase::Idle);
        assert!(view.partial.is_none());
    }

    #[test]
    fn test_close_without_done_is_a_failure() {
        let mut ctl = ConversationController::default();
        let out = send(&mut ctl, "hi");
        ctl.on_chunk(out.ticket, b"data: {\"content\":\"partial\"}\n");
        assert_eq!(ctl.on_stream_end(out.ticket), StreamProgress::Failed);
        assert!(ctl.view().entries.is_empty());
        assert_eq!(
            ctl.status(),
            ChatStatus::Error(ChatError::PrematureClose.to_string())
        );
    }

    #[test]
    fn test_unterminated_done_completes_at_stream_end() {
        let mut ctl = ConversationController::default();
        let out = send(&mut ctl, "hi");
        ctl.on_chunk(out.ticket, b"data: {\"content\":\"yo\"}\ndata: {\"done\":true}");
        assert_eq!(ctl.on_stream_end(out.ticket), StreamProgress::Completed);
        assert_eq!(ctl.view().entries.len(), 2);
    }

    #[test]
    fn test_abort_rolls_back_and_keeps_cache() {
        let mut ctl = ConversationController::default();
        ctl.on_page_loaded(1, Page::default());
        let out = send(&mut ctl, "cancel me");
        assert!(ctl.abort(out.ticket));
        assert!(ctl.view().entries.is_empty());
        let (_, must_fetch) = ctl.select_page(1);
        assert!(!must_fetch);
        assert_eq!(ctl.on_chunk(out.ticket, HI_THERE), StreamProgress::Stale);
    }

    #[test]
    fn test_clear_while_streaming_leaves_no_orphans() {
        let mut ctl = ConversationController::default();
        let out = send(&mut ctl, "Hello");
        ctl.on_stream_opened(out.ticket);
        ctl.on_chunk(out.ticket, b"data: {\"content\":\"Hi\"}\n");

        ctl.on_history_cleared();
        assert_eq!(ctl.on_chunk(out.ticket, b"data: {\"done\":true}\n"), StreamProgress::Stale);

        let view = ctl.view();
        assert!(view.entries.is_empty());
        assert_eq!(view.page, 1);
        assert_eq!(view.status, ChatStatus::Idle);
        assert_eq!(ctl.history_epoch(), 1);
        assert!(ctl.drain_cues().iter().all(|c| *c != Cue::Received));
    }

    #[test]
    fn test_other_pages_hide_tail_while_streaming() {
        let mut ctl = ConversationController::default();
        ctl.on_page_loaded(
            1,
            Page {
                messages: vec![confirmed(30, Role::User, "recent")],
                total: 30,
                total_pages: 2,
            },
        );
        ctl.on_page_loaded(
            2,
            Page {
                messages: vec![confirmed(1, Role::User, "old")],
                total: 30,
                total_pages: 2,
            },
        );
        let out = send(&mut ctl, "live");
        ctl.on_chunk(out.ticket, b"data: {\"content\":\"x\"}\n");

        assert_eq!(ctl.select_page(2), (2, false));
        let view = ctl.view();
        assert_eq!(view.entries.len(), 1);
        assert!(view.partial.is_none());

        ctl.select_page(1);
        let view = ctl.view();
        assert_eq!(view.entries.len(), 2);
        assert_eq!(view.partial.as_deref(), Some("x"));
    }

    #[test]
    fn test_select_page_is_clamped() {
        let mut ctl = ConversationController::default();
        ctl.on_page_loaded(
            1,
            Page {
                messages: Vec::new(),
                total: 25,
                total_pages: 2,
            },
        );
        assert_eq!(ctl.select_page(9), (2, true));
        assert_eq!(ctl.current_page(), 2);
    }
}

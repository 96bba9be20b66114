//! Merges confirmed history with pending optimistic entries.
//!
//! The reconciler is the single owner of the ledger and the page cache. All
//! mutation goes through `append`, `rollback`, `apply_page` and `clear`; the
//! rendering layer only ever receives [`ViewEntry`] snapshots.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::chat::ids::LocalId;
use crate::chat::ledger::{OptimisticEntry, OptimisticLedger};
use crate::chat::page_cache::{PageCache, PageTotals};
use crate::chat::types::{Message, Page, Role};

/// One rendered row of the conversation view.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ViewEntry {
    /// Durable message from the store.
    Confirmed(Message),
    /// Optimistic entry awaiting confirmation.
    Pending(OptimisticEntry),
}

impl ViewEntry {
    /// Author of the entry.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Confirmed(m) => m.role,
            Self::Pending(e) => e.role,
        }
    }

    /// Text of the entry.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Confirmed(m) => &m.content,
            Self::Pending(e) => &e.content,
        }
    }

    /// Creation time (local for pending entries).
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Confirmed(m) => m.created_at,
            Self::Pending(e) => e.created_at,
        }
    }

    /// Whether the entry is still optimistic.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Owner of the ledger and page cache.
#[derive(Default)]
pub struct Reconciler {
    ledger: OptimisticLedger,
    pages: PageCache,
}

impl Reconciler {
    /// Create a reconciler whose cache holds `capacity` pages.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ledger: OptimisticLedger::new(),
            pages: PageCache::new(capacity),
        }
    }

    /// Add a pending entry.
    pub fn append(&mut self, entry: OptimisticEntry) -> LocalId {
        self.ledger.append(entry)
    }

    /// Remove a pending entry whose exchange failed.
    pub fn rollback(&mut self, local_id: LocalId) -> bool {
        self.ledger.rollback(local_id)
    }

    /// Store a fetched page. A refreshed page 1 retires the entries it confirms.
    ///
    /// Returns the index the page was filed under.
    pub fn apply_page(&mut self, requested: u32, page: Page) -> u32 {
        let index = self.pages.insert(requested, page);
        let latest = if index == 1 { self.pages.get(1) } else { None };
        if let Some(first) = latest {
            let retired = self.ledger.retire_matching(&first.messages);
            if !retired.is_empty() {
                debug!(count = retired.len(), "confirmed optimistic entries");
            }
        }
        index
    }

    /// Mark page 1 stale. Its confirmed rows keep rendering until the
    /// refetch arrives.
    pub fn invalidate_latest(&mut self) {
        self.pages.invalidate(1);
    }

    /// Forget all history and pending entries.
    pub fn clear(&mut self) {
        self.ledger.clear();
        self.pages.clear();
    }

    /// Rows for `page`: page 1 is confirmed history followed by the pending
    /// tail; any other page is exactly its stored messages.
    #[must_use]
    pub fn view(&self, page: u32) -> Vec<ViewEntry> {
        let mut rows: Vec<ViewEntry> = self
            .pages
            .get(page)
            .map(|p| p.messages.iter().cloned().map(ViewEntry::Confirmed).collect())
            .unwrap_or_default();
        if page == 1 {
            rows.extend(
                self.ledger
                    .remaining()
                    .iter()
                    .cloned()
                    .map(ViewEntry::Pending),
            );
        }
        rows
    }

    /// Pending entries.
    #[must_use]
    pub fn pending(&self) -> &[OptimisticEntry] {
        self.ledger.remaining()
    }

    /// Whether `page` is cached and not stale.
    #[must_use]
    pub fn has_page(&self, page: u32) -> bool {
        self.pages.is_fresh(page)
    }

    /// Clamp a page index into the known range.
    #[must_use]
    pub fn clamp_page(&self, page: u32) -> u32 {
        self.pages.clamp(page)
    }

    /// Totals from the last fetch.
    #[must_use]
    pub const fn totals(&self) -> Option<PageTotals> {
        self.pages.totals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::MessageId;

    fn message(id: i64, role: Role, content: &str) -> Message {
        Message {
            id: MessageId(id),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            client_token: None,
        }
    }

    fn page(messages: Vec<Message>, total_pages: u32) -> Page {
        Page {
            total: messages.len() as u64,
            messages,
            total_pages,
        }
    }

    #[test]
    fn test_confirmed_history_precedes_pending_tail() {
        let mut rec = Reconciler::default();
        rec.apply_page(1, page(vec![message(1, Role::User, "old")], 1));
        rec.append(OptimisticEntry::new(Role::User, "new", Utc::now(), None));

        let rows = rec.view(1);
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].is_pending());
        assert!(rows[1].is_pending());
        assert_eq!(rows[1].content(), "new");
    }

    #[test]
    fn test_page_one_refresh_transitions_entries_once() {
        let mut rec = Reconciler::default();
        rec.append(OptimisticEntry::new(Role::User, "Hello", Utc::now(), None));
        rec.append(OptimisticEntry::new(Role::Assistant, "Hi there", Utc::now(), None));

        rec.invalidate_latest();
        rec.apply_page(
            1,
            page(
                vec![
                    message(1, Role::User, "Hello"),
                    message(2, Role::Assistant, "Hi there"),
                ],
                1,
            ),
        );

        let rows = rec.view(1);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| !r.is_pending()));
        assert!(rec.pending().is_empty());
    }

    #[test]
    fn test_stale_page_one_keeps_confirmed_rows() {
        let mut rec = Reconciler::default();
        rec.apply_page(1, page(vec![message(1, Role::User, "old")], 1));
        rec.append(OptimisticEntry::new(Role::User, "new", Utc::now(), None));

        rec.invalidate_latest();

        assert!(!rec.has_page(1));
        let rows = rec.view(1);
        let contents: Vec<&str> = rows.iter().map(ViewEntry::content).collect();
        assert_eq!(contents, ["old", "new"]);
    }

    #[test]
    fn test_older_pages_never_show_pending() {
        let mut rec = Reconciler::default();
        rec.apply_page(2, page(vec![message(1, Role::User, "ancient")], 2));
        rec.append(OptimisticEntry::new(Role::User, "ancient", Utc::now(), None));

        let rows = rec.view(2);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_pending());
        assert_eq!(rec.pending().len(), 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut rec = Reconciler::default();
        rec.apply_page(1, page(vec![message(1, Role::User, "a")], 1));
        rec.append(OptimisticEntry::new(Role::User, "b", Utc::now(), None));
        rec.clear();
        assert!(rec.view(1).is_empty());
        assert!(rec.totals().is_none());
    }
}

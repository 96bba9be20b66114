//! Cache of fetched history pages.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

use crate::chat::types::Page;

/// Default number of pages kept in memory.
pub const DEFAULT_CAPACITY: usize = 16;

/// Totals reported by the most recent fetch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PageTotals {
    /// Total message count.
    pub total: u64,
    /// Number of pages.
    pub total_pages: u32,
}

/// Fetched pages keyed by index, newest page = 1.
///
/// Pages are immutable snapshots; only page 1 is ever invalidated during a
/// conversation. An invalidated page stays readable until its refetch lands.
pub struct PageCache {
    pages: LruCache<u32, Page>,
    stale: HashSet<u32>,
    totals: Option<PageTotals>,
}

impl PageCache {
    /// Create a cache holding up to `capacity` pages.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            pages: LruCache::new(capacity),
            stale: HashSet::new(),
            totals: None,
        }
    }

    /// Cached page, if present, even when stale.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&Page> {
        self.pages.peek(&index)
    }

    /// Whether the page is cached.
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        self.pages.contains(&index)
    }

    /// Whether the page is cached and has not been invalidated since.
    #[must_use]
    pub fn is_fresh(&self, index: u32) -> bool {
        self.contains(index) && !self.stale.contains(&index)
    }

    /// Store a freshly fetched page and return the index it was filed under.
    ///
    /// A page requested beyond the reported `totalPages` is filed under the
    /// last valid index, matching the store's clamping.
    pub fn insert(&mut self, requested: u32, page: Page) -> u32 {
        let index = clamp_index(requested, page.last_index());
        self.totals = Some(PageTotals {
            total: page.total,
            total_pages: page.total_pages,
        });
        self.stale.remove(&index);
        match self.pages.push(index, page) {
            Some((old, _)) if old == index => debug!(index, "replaced cached page"),
            Some((evicted, _)) => {
                self.stale.remove(&evicted);
                debug!(evicted, "evicted cached page");
            }
            None => {}
        }
        index
    }

    /// Mark one page stale so the next selection refetches it. Its rows stay
    /// readable until the refetch replaces them.
    pub fn invalidate(&mut self, index: u32) {
        if self.pages.contains(&index) && self.stale.insert(index) {
            debug!(index, "marked cached page stale");
        }
    }

    /// Drop everything, including the known totals.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.stale.clear();
        self.totals = None;
    }

    /// Totals from the last fetch, if any.
    #[must_use]
    pub const fn totals(&self) -> Option<PageTotals> {
        self.totals
    }

    /// Clamp a requested index into the known page range.
    #[must_use]
    pub fn clamp(&self, requested: u32) -> u32 {
        let last = self
            .totals
            .map_or(u32::MAX, |t| t.total_pages.max(1));
        clamp_index(requested, last)
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

const fn clamp_index(requested: u32, last: u32) -> u32 {
    if requested == 0 {
        1
    } else if requested > last {
        last
    } else {
        requested
    }
}

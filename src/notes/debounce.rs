//! Deadline-based debouncer.

use std::time::Duration;

use tokio::time::Instant;

/// Holds the latest edit until the quiet window elapses.
///
/// Time is passed in by the caller, so the debouncer itself never sleeps.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    pending: Option<String>,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet window.
    #[must_use]
    pub const fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
            deadline: None,
        }
    }

    /// Record an edit and restart the quiet window.
    pub fn edit(&mut self, content: String, now: Instant) {
        self.pending = Some(content);
        self.deadline = Some(now + self.quiet);
    }

    /// When the pending edit becomes due.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether an edit is waiting.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending edit if its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Take the pending edit regardless of the window.
    pub fn flush(&mut self) -> Option<String> {
        self.deadline = None;
        self.pending.take()
    }
}

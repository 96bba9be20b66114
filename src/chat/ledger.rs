//! Optimistic ledger: locally created entries not yet confirmed by the store.

use chrono::{DateTime, Utc};

use crate::chat::ids::{CorrelationToken, LocalId};
use crate::chat::types::{Message, Role};

/// A message shown before the store confirms it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OptimisticEntry {
    /// Placeholder id, never a store id.
    pub local_id: LocalId,
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Local creation time.
    pub created_at: DateTime<Utc>,
    /// Token of the exchange this entry belongs to.
    pub token: Option<CorrelationToken>,
}

impl OptimisticEntry {
    /// Build a pending entry with a fresh placeholder id.
    #[must_use]
    pub fn new(
        role: Role,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
        token: Option<CorrelationToken>,
    ) -> Self {
        Self {
            local_id: LocalId::new(),
            role,
            content: content.into(),
            created_at,
            token,
        }
    }

    /// Whether `confirmed` is the durable counterpart of this entry.
    ///
    /// Tokens decide when both sides carry one; otherwise `(role, content)`
    /// equality is the fallback.
    #[must_use]
    pub fn matches(&self, confirmed: &Message) -> bool {
        if self.role != confirmed.role {
            return false;
        }
        match (self.token, confirmed.client_token) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => self.content == confirmed.content,
        }
    }
}

/// Ordered list of pending entries.
#[derive(Clone, Debug, Default)]
pub struct OptimisticLedger {
    entries: Vec<OptimisticEntry>,
}

impl OptimisticLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its placeholder id.
    pub fn append(&mut self, entry: OptimisticEntry) -> LocalId {
        let id = entry.local_id;
        self.entries.push(entry);
        id
    }

    /// Remove the entries confirmed by `confirmed`.
    ///
    /// Each confirmed message retires at most one entry, the first match in
    /// ledger order, so two identical pending phrases are not both consumed by
    /// a single durable copy. Returns the retired ids.
    pub fn retire_matching(&mut self, confirmed: &[Message]) -> Vec<LocalId> {
        let mut retired = Vec::new();
        for message in confirmed {
            if let Some(pos) = self.entries.iter().position(|e| e.matches(message)) {
                retired.push(self.entries.remove(pos).local_id);
            }
        }
        retired
    }

    /// Remove one specific entry. Returns whether it was present.
    pub fn rollback(&mut self, local_id: LocalId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.local_id != local_id);
        self.entries.len() != before
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries still pending, in append order.
    #[must_use]
    pub fn remaining(&self) -> &[OptimisticEntry] {
        &self.entries
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::MessageId;

    fn confirmed(id: i64, role: Role, content: &str) -> Message {
        Message {
            id: MessageId(id),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            client_token: None,
        }
    }

    fn entry(role: Role, content: &str) -> OptimisticEntry {
        OptimisticEntry::new(role, content, Utc::now(), None)
    }

    #[test]
    fn test_append_assigns_distinct_local_ids() {
        let mut ledger = OptimisticLedger::new();
        let a = ledger.append(entry(Role::User, "a"));
        let b = ledger.append(entry(Role::User, "a"));
        assert_ne!(a, b);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_retire_removes_exact_matches_only() {
        let mut ledger = OptimisticLedger::new();
        ledger.append(entry(Role::User, "Hello"));
        ledger.append(entry(Role::Assistant, "Hi there"));
        let keep = ledger.append(entry(Role::User, "Still pending"));

        let retired = ledger.retire_matching(&[
            confirmed(1, Role::User, "Hello"),
            confirmed(2, Role::Assistant, "Hi there"),
            confirmed(3, Role::Assistant, "Still pending"),
        ]);

        assert_eq!(retired.len(), 2);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.remaining()[0].local_id, keep);
    }

    #[test]
    fn test_one_confirmed_retires_one_entry() {
        let mut ledger = OptimisticLedger::new();
        let first = ledger.append(entry(Role::User, "ok"));
        let second = ledger.append(entry(Role::User, "ok"));

        let retired = ledger.retire_matching(&[confirmed(1, Role::User, "ok")]);

        assert_eq!(retired, vec![first]);
        assert_eq!(ledger.remaining()[0].local_id, second);
    }

    #[test]
    fn test_token_match_wins_over_content() {
        let token = CorrelationToken::new();
        let other = CorrelationToken::new();
        let mut ledger = OptimisticLedger::new();
        ledger.append(OptimisticEntry::new(Role::User, "ok", Utc::now(), Some(token)));

        let mut older = confirmed(1, Role::User, "ok");
        older.client_token = Some(other);
        assert!(ledger.retire_matching(&[older]).is_empty());

        let mut echoed = confirmed(2, Role::User, "ok");
        echoed.client_token = Some(token);
        assert_eq!(ledger.retire_matching(&[echoed]).len(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_token_match_ignores_content_edits() {
        let token = CorrelationToken::new();
        let mut ledger = OptimisticLedger::new();
        ledger.append(OptimisticEntry::new(Role::User, "hello ", Utc::now(), Some(token)));
        let mut stored = confirmed(1, Role::User, "hello");
        stored.client_token = Some(token);
        assert_eq!(ledger.retire_matching(&[stored]).len(), 1);
    }

    #[test]
    fn test_role_must_match() {
        let mut ledger = OptimisticLedger::new();
        ledger.append(entry(Role::Assistant, "echo"));
        assert!(ledger.retire_matching(&[confirmed(1, Role::User, "echo")]).is_empty());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_rollback_removes_only_target() {
        let mut ledger = OptimisticLedger::new();
        let a = ledger.append(entry(Role::User, "a"));
        let b = ledger.append(entry(Role::User, "b"));
        assert!(ledger.rollback(a));
        assert!(!ledger.rollback(a));
        assert_eq!(ledger.remaining()[0].local_id, b);
    }
}

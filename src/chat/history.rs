//! Whole-history export.

use tracing::{debug, warn};

use crate::chat::error::ChatResult;
use crate::chat::transport::PageSource;
use crate::chat::types::Message;

/// Hard ceiling on pages walked in one export.
pub const MAX_HISTORY_PAGES: u32 = 10_000;

/// Read every stored message, oldest first.
///
/// Pages are walked from 1 upward. The page count is re-read from every
/// response, so a history that grows or shrinks mid-walk still terminates.
/// Messages appearing on two pages because of a concurrent insert are kept
/// once.
///
/// # Errors
///
/// Returns the first fetch failure; no partial transcript is produced.
pub async fn materialize_history(source: &dyn PageSource) -> ChatResult<Vec<Message>> {
    let mut messages = Vec::new();
    let mut page = 1;
    loop {
        let fetched = source.fetch_page(page).await?;
        debug!(page, count = fetched.messages.len(), "history page read");
        let total_pages = fetched.total_pages;
        messages.extend(fetched.messages);

        if page >= total_pages {
            break;
        }
        if page >= MAX_HISTORY_PAGES {
            warn!(total_pages, "history export stopped at page ceiling");
            break;
        }
        page += 1;
    }

    messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    messages.dedup_by_key(|m| m.id);
    Ok(messages)
}

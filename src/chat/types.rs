//! Wire and domain types shared by the client pipeline and the backing service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::ids::CorrelationToken;

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text typed by the user.
    User,
    /// Generated reply.
    Assistant,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// Identifier assigned by the backing store. Never generated client-side.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A confirmed, immutable message as returned by the backing store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned id.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Ordering key.
    pub created_at: DateTime<Utc>,
    /// Token of the exchange that produced this message, when the store echoes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<CorrelationToken>,
}

/// One slice of message history. Page 1 is the most recent slice.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Messages in store order (ascending by creation).
    pub messages: Vec<Message>,
    /// Total message count across all pages.
    pub total: u64,
    /// Number of pages reported by the store.
    pub total_pages: u32,
}

impl Page {
    /// Highest page index that can be requested; an empty history still has page 1.
    #[must_use]
    pub fn last_index(&self) -> u32 {
        self.total_pages.max(1)
    }
}

/// Body of a send request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Text typed by the user.
    pub message: String,
    /// Correlation token echoed on the durable messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<CorrelationToken>,
}

/// JSON payload carried by one `data:` line of the streaming protocol.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    /// Content delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Completion marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl StreamPayload {
    /// Payload for a content delta.
    #[must_use]
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: None,
        }
    }

    /// Payload for the completion marker.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            content: None,
            done: Some(true),
        }
    }
}

/// Scratchpad notes document.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NotesDocument {
    /// Free text.
    pub content: String,
}

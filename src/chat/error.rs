//! Error types for the assistant message pipeline.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the client pipeline.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP request failed (connect, TLS, body read, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The stream closed without a completion frame.
    #[error("stream closed before completion")]
    PrematureClose,

    /// No chunk arrived within the idle window.
    #[error("stream idle for {0:?}")]
    IdleTimeout(Duration),

    /// The exchange was aborted locally.
    #[error("exchange cancelled")]
    Cancelled,

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::chat::config::ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether this error is fatal to the current turn only.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Status { .. } | Self::PrematureClose | Self::IdleTimeout(_)
        )
    }
}

/// Convenience result alias for pipeline operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// A malformed stream frame. Recovered inside the decoder, never fatal.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload after the prefix was not valid JSON for a frame.
    #[error("malformed frame payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A line grew past the buffer ceiling without a terminator.
    #[error("frame line exceeds {0} bytes")]
    LineTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(ChatError::PrematureClose.is_transport());
        assert!(ChatError::IdleTimeout(Duration::from_secs(1)).is_transport());
        assert!(
            ChatError::Status {
                status: 502,
                body: String::new()
            }
            .is_transport()
        );
        assert!(!ChatError::Cancelled.is_transport());
        assert!(
            !ChatError::Config(crate::chat::config::ConfigError::Invalid(
                "page_cache_capacity",
                "must be > 0".to_string()
            ))
            .is_transport()
        );
    }
}

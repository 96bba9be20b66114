//! Text generation behind the chat endpoint.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::chat::types::{Message, Role};

pub mod ollama;

pub use ollama::{OllamaGenerator, OllamaSettings};

/// Boxed future type for generator operations.
pub type GeneratorFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One event of a streamed generation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GenerationEvent {
    /// A text fragment.
    Token(String),
    /// Generation finished normally.
    Done,
    /// Generation failed after it started.
    Error(String),
}

/// Errors raised before a generation starts.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP client error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// The model server answered with a non-success status.
    #[error("model server returned status {0}")]
    Status(u16),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for generation.
pub type LlmResult<T> = Result<T, LlmError>;

/// Streaming text generator.
pub trait TextGenerator: Send + Sync {
    /// Start generating a reply to `prompt`.
    ///
    /// Returns once the model accepted the request; events then arrive on the
    /// receiver until `Done` or `Error`.
    ///
    /// # Errors
    /// Returns an error if the model server is unreachable or refuses the
    /// request.
    fn generate(&self, prompt: String) -> GeneratorFuture<'_, LlmResult<mpsc::Receiver<GenerationEvent>>>;
}

/// Render recent history plus the new user message as a plain-text prompt.
#[must_use]
pub fn build_prompt(history: &[Message], user_message: &str) -> String {
    let mut prompt = String::new();
    for message in history {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(speaker);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("User: ");
    prompt.push_str(user_message);
    prompt.push_str("\nAssistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::chat::types::MessageId;

    #[test]
    fn test_prompt_ends_with_assistant_turn() {
        let history = vec![
            Message {
                id: MessageId(1),
                role: Role::User,
                content: "Hello".to_string(),
                created_at: Utc::now(),
                client_token: None,
            },
            Message {
                id: MessageId(2),
                role: Role::Assistant,
                content: "Hi there".to_string(),
                created_at: Utc::now(),
                client_token: None,
            },
        ];
        let prompt = build_prompt(&history, "How are you?");
        assert_eq!(
            prompt,
            "User: Hello\nAssistant: Hi there\nUser: How are you?\nAssistant:"
        );
    }

    #[test]
    fn test_prompt_without_history() {
        assert_eq!(build_prompt(&[], "x"), "User: x\nAssistant:");
    }
}

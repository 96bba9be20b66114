//! Seams between the pipeline and the assistant service.
//!
//! The controller and materializer only see these traits; the HTTP
//! implementation lives here too.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::chat::config::ClientConfig;
use crate::chat::error::{ChatError, ChatResult};
use crate::chat::types::{NotesDocument, Page, SendRequest};

/// Boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw response body of a send, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = ChatResult<Vec<u8>>> + Send>>;

/// Longest error body kept in [`ChatError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Read access to paged history.
pub trait PageSource: Send + Sync {
    /// Fetch one page (1 = newest).
    fn fetch_page(&self, page: u32) -> TransportFuture<'_, ChatResult<Page>>;
}

/// Full chat surface.
pub trait ChatTransport: PageSource {
    /// Post a message and return the streamed reply body.
    fn open_stream(&self, request: SendRequest) -> TransportFuture<'_, ChatResult<ByteStream>>;

    /// Delete all stored history.
    fn clear_history(&self) -> TransportFuture<'_, ChatResult<()>>;
}

/// Persistence for the notes document.
pub trait NotesBackend: Send + Sync {
    /// Load the current document.
    fn load_notes(&self) -> TransportFuture<'_, ChatResult<String>>;

    /// Replace the document.
    fn save_notes(&self, content: String) -> TransportFuture<'_, ChatResult<()>>;
}

/// `reqwest` client for the assistant service.
#[derive(Clone, Debug)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpChatTransport {
    /// Build a client from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &ClientConfig) -> ChatResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Turn a non-success response into [`ChatError::Status`].
async fn ensure_success(response: reqwest::Response) -> ChatResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(ChatError::Status {
        status: status.as_u16(),
        body,
    })
}

impl PageSource for HttpChatTransport {
    fn fetch_page(&self, page: u32) -> TransportFuture<'_, ChatResult<Page>> {
        Box::pin(async move {
            debug!(page, "fetching history page");
            let response = self
                .client
                .get(self.url("/api/chat/history"))
                .query(&[("page", page)])
                .timeout(self.request_timeout)
                .send()
                .await?;
            let page = ensure_success(response).await?.json::<Page>().await?;
            Ok(page)
        })
    }
}

impl ChatTransport for HttpChatTransport {
    fn open_stream(&self, request: SendRequest) -> TransportFuture<'_, ChatResult<ByteStream>> {
        Box::pin(async move {
            // No overall timeout: the session enforces an idle window per chunk.
            let response = self
                .client
                .post(self.url("/api/chat"))
                .json(&request)
                .send()
                .await?;
            let response = ensure_success(response).await?;
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from));
            Ok(Box::pin(body) as ByteStream)
        })
    }

    fn clear_history(&self) -> TransportFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let response = self
                .client
                .delete(self.url("/api/chat/history"))
                .timeout(self.request_timeout)
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }
}

impl NotesBackend for HttpChatTransport {
    fn load_notes(&self) -> TransportFuture<'_, ChatResult<String>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url("/api/notes"))
                .timeout(self.request_timeout)
                .send()
                .await?;
            let doc = ensure_success(response)
                .await?
                .json::<NotesDocument>()
                .await?;
            Ok(doc.content)
        })
    }

    fn save_notes(&self, content: String) -> TransportFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let response = self
                .client
                .put(self.url("/api/notes"))
                .json(&NotesDocument { content })
                .timeout(self.request_timeout)
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = ClientConfig::default().with_base_url("http://localhost:8080/");
        let transport = HttpChatTransport::new(&config).unwrap();
        assert_eq!(
            transport.url("/api/chat"),
            "http://localhost:8080/api/chat"
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ClientConfig::default().with_base_url("::nope::");
        assert!(matches!(
            HttpChatTransport::new(&config),
            Err(ChatError::Config(_))
        ));
    }
}

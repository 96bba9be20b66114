//! Streaming generation against an Ollama server.
//!
//! `POST /api/generate` with `stream: true` answers with one JSON object per
//! line (`{"response":"...","done":false}`), ending with `"done":true`.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm::{GenerationEvent, GeneratorFuture, LlmError, LlmResult, TextGenerator};

/// Default Ollama API URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default model name as installed in Ollama.
pub const DEFAULT_MODEL: &str = "mistral:7b-instruct-q8_0";

/// Target context length (tokens).
const CONTEXT_LENGTH: u32 = 8_192;

/// Conservative default batch for 8K context to reduce OOM risk.
const NUM_BATCH: u32 = 256;

/// Default token budget for generation.
const DEFAULT_NUM_PREDICT: u32 = 512;

/// Default thread count if `available_parallelism()` is unavailable.
const DEFAULT_NUM_THREAD: u32 = 8;

/// Connection timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered events between the HTTP reader and the chat route.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Settings for [`OllamaGenerator`].
#[derive(Clone, Debug)]
pub struct OllamaSettings {
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Model to run.
    pub model: String,
    /// How long Ollama keeps the model resident.
    pub keep_alive: String,
    /// Token budget per reply.
    pub num_predict: u32,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            keep_alive: "1h".to_string(),
            num_predict: DEFAULT_NUM_PREDICT,
        }
    }
}

#[derive(Serialize)]
struct GenerateOptions {
    num_ctx: u32,
    num_predict: u32,
    num_batch: u32,
    num_thread: u32,
    f16_kv: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Async Ollama client producing token streams.
#[derive(Clone, Debug)]
pub struct OllamaGenerator {
    client: Client,
    settings: OllamaSettings,
}

impl OllamaGenerator {
    /// Build a generator.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: OllamaSettings) -> LlmResult<Self> {
        let client = Client::builder().connect_timeout(IO_TIMEOUT).build()?;
        Ok(Self { client, settings })
    }

    /// Whether the server answers `GET /api/version`.
    pub async fn is_ready(&self) -> bool {
        let url = format!("{}/api/version", self.base_url());
        match self.client.get(&url).timeout(IO_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(%err, "ollama not reachable");
                false
            }
        }
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }
}

impl TextGenerator for OllamaGenerator {
    fn generate(&self, prompt: String) -> GeneratorFuture<'_, LlmResult<mpsc::Receiver<GenerationEvent>>> {
        Box::pin(async move {
            let request = GenerateRequest {
                model: &self.settings.model,
                prompt: &prompt,
                stream: true,
                keep_alive: &self.settings.keep_alive,
                options: GenerateOptions {
                    num_ctx: CONTEXT_LENGTH,
                    num_predict: self.settings.num_predict,
                    num_batch: NUM_BATCH,
                    num_thread: detect_num_thread(),
                    f16_kv: true,
                },
            };

            let url = format!("{}/api/generate", self.base_url());
            let response = self.client.post(&url).json(&request).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(LlmError::Status(status.as_u16()));
            }
            info!(model = %self.settings.model, "generation started");

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let mut body = response.bytes_stream();
            tokio::spawn(async move {
                let mut lines = LineBuffer::default();
                while let Some(chunk) = body.next().await {
                    let bytes = match chunk {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            let _ = tx.send(GenerationEvent::Error(err.to_string())).await;
                            return;
                        }
                    };
                    for line in lines.push(&bytes) {
                        let Some(event) = parse_chunk(&line) else {
                            continue;
                        };
                        let finished = !matches!(event, GenerationEvent::Token(_));
                        if tx.send(event).await.is_err() {
                            debug!("generation receiver dropped");
                            return;
                        }
                        if finished {
                            return;
                        }
                    }
                }
                let _ = tx
                    .send(GenerationEvent::Error(
                        "model stream ended before completion".to_string(),
                    ))
                    .await;
            });

            Ok(rx)
        })
    }
}

/// Splits a byte stream into complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

/// Map one NDJSON line to an event. Unparseable lines are skipped.
fn parse_chunk(line: &[u8]) -> Option<GenerationEvent> {
    let chunk: GenerateChunk = match serde_json::from_slice(line) {
        Ok(chunk) => chunk,
        Err(err) => {
            warn!(%err, "skipping malformed ollama line");
            return None;
        }
    };
    if let Some(error) = chunk.error {
        return Some(GenerationEvent::Error(error));
    }
    if chunk.done {
        return Some(GenerationEvent::Done);
    }
    chunk
        .response
        .filter(|text| !text.is_empty())
        .map(GenerationEvent::Token)
}

fn detect_num_thread() -> u32 {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .map_or(DEFAULT_NUM_THREAD, |v| u32::try_from(v).unwrap_or(u32::MAX))
}

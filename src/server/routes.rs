//! HTTP route handlers for the assistant API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::ids::CorrelationToken;
use crate::chat::types::{NotesDocument, Page, Role, SendRequest, StreamPayload};
use crate::llm::{GenerationEvent, build_prompt};
use crate::storage::NewMessage;

use super::state::AppState;

type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route(
            "/api/chat/history",
            get(history_page).delete(clear_history),
        )
        .route("/api/notes", get(load_notes).put(save_notes))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "scriptdesk-assistant",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One `data:` line of the reply stream.
fn frame_line(payload: &StreamPayload) -> String {
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    format!("data: {json}\n\n")
}

struct ReplyStream {
    events: mpsc::Receiver<GenerationEvent>,
    state: Arc<AppState>,
    token: Option<CorrelationToken>,
    epoch: u64,
    reply: String,
}

impl ReplyStream {
    /// Next frame and whether it is the last, or `None` once the stream must
    /// close.
    ///
    /// The assistant message is stored before the completion frame is
    /// yielded. A failed generation closes the body without a completion
    /// frame.
    async fn next_frame(&mut self) -> Option<(String, bool)> {
        match self.events.recv().await {
            Some(GenerationEvent::Token(text)) => {
                self.reply.push_str(&text);
                Some((frame_line(&StreamPayload::delta(text)), false))
            }
            Some(GenerationEvent::Done) => {
                let message =
                    NewMessage::now(Role::Assistant, std::mem::take(&mut self.reply), self.token);
                match self.state.append_if_current(self.epoch, message).await {
                    Ok(Some(_)) => {}
                    Ok(None) => info!("history cleared during generation; reply not stored"),
                    Err(err) => {
                        warn!(%err, "failed to store assistant reply");
                        return None;
                    }
                }
                Some((frame_line(&StreamPayload::done()), true))
            }
            Some(GenerationEvent::Error(err)) => {
                warn!(%err, "generation failed mid-stream");
                None
            }
            None => {
                warn!("generator closed without completion");
                None
            }
        }
    }
}

/// Post a message and stream the generated reply.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Result<Response, ApiError> {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message must not be empty".to_string()));
    }

    let history = state
        .messages
        .recent(state.config.history_window)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?;
    let prompt = build_prompt(&history, &message);

    let events = state
        .generator
        .generate(prompt)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("LLM error: {e}")))?;

    let epoch = state
        .open_exchange(NewMessage::now(Role::User, message, request.client_token))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?;

    let reply = ReplyStream {
        events,
        state,
        token: request.client_token,
        epoch,
        reply: String::new(),
    };
    let body = stream::unfold(Some(reply), |reply| async move {
        let mut reply = reply?;
        let (frame, finished) = reply.next_frame().await?;
        Some((Ok::<_, Infallible>(frame), (!finished).then_some(reply)))
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// History page query.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Page index, 1 = newest. Defaults to 1.
    pub page: Option<u32>,
}

/// Read one history page.
async fn history_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Page>, ApiError> {
    let page = query.page.unwrap_or(1);
    debug!(page, "history page requested");
    let page = state
        .messages
        .page(page, state.config.page_size)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?;
    Ok(Json(page))
}

/// Delete all history.
async fn clear_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (epoch, deleted) = state
        .clear_history()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?;
    info!(deleted, epoch, "history cleared");
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// Read the notes document.
async fn load_notes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NotesDocument>, ApiError> {
    let content = state
        .notes
        .load()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?;
    Ok(Json(NotesDocument { content }))
}

/// Replace the notes document.
async fn save_notes(
    State(state): State<Arc<AppState>>,
    Json(document): Json<NotesDocument>,
) -> Result<StatusCode, ApiError> {
    state
        .notes
        .save(document.content)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}")))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::llm::{GeneratorFuture, LlmError, LlmResult, TextGenerator};
    use crate::server::config::ServerConfig;
    use crate::storage::{self, SqliteMessageStore, SqliteNotesStore};

    /// Generator replaying a fixed script.
    struct ScriptedGenerator {
        tokens: Vec<&'static str>,
        unreachable: bool,
        completes: bool,
    }

    impl ScriptedGenerator {
        fn replying(tokens: Vec<&'static str>) -> Self {
            Self {
                tokens,
                unreachable: false,
                completes: true,
            }
        }
    }

    impl TextGenerator for ScriptedGenerator {
        fn generate(
            &self,
            _prompt: String,
        ) -> GeneratorFuture<'_, LlmResult<mpsc::Receiver<GenerationEvent>>> {
            Box::pin(async move {
                if self.unreachable {
                    return Err(LlmError::Status(503));
                }
                let (tx, rx) = mpsc::channel(self.tokens.len() + 1);
                for token in &self.tokens {
                    let _ = tx.send(GenerationEvent::Token((*token).to_string())).await;
                }
                let last = if self.completes {
                    GenerationEvent::Done
                } else {
                    GenerationEvent::Error("model crashed".to_string())
                };
                let _ = tx.send(last).await;
                Ok(rx)
            })
        }
    }

    async fn build_state(generator: ScriptedGenerator, page_size: u32) -> Arc<AppState> {
        let conn = storage::open_in_memory().await.unwrap();
        let messages = SqliteMessageStore::new(conn.clone()).await.unwrap();
        let notes = SqliteNotesStore::new(conn).await.unwrap();
        AppState::new(
            Arc::new(messages),
            Arc::new(notes),
            Arc::new(generator),
            ServerConfig {
                page_size,
                ..ServerConfig::default()
            },
        )
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn post_chat(state: &Arc<AppState>, body: serde_json::Value) -> Response {
        create_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get_page(state: &Arc<AppState>, page: u32) -> Page {
        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/chat/history?page={page}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let state = build_state(ScriptedGenerator::replying(vec![]), 20).await;
        let response = create_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"ok\""));
    }

    #[tokio::test]
    async fn test_chat_streams_frames_and_persists_both_messages() {
        let state = build_state(ScriptedGenerator::replying(vec!["Hi", " there"]), 20).await;
        let token = CorrelationToken::new();
        let response = post_chat(
            &state,
            serde_json::json!({ "message": "Hello", "client_token": token }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let text = body_text(response).await;
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(
            lines,
            [
                r#"data: {"content":"Hi"}"#,
                r#"data: {"content":" there"}"#,
                r#"data: {"done":true}"#,
            ]
        );

        let page = get_page(&state, 1).await;
        assert_eq!(page.total, 2);
        assert_eq!(page.messages[0].role, Role::User);
        assert_eq!(page.messages[0].content, "Hello");
        assert_eq!(page.messages[1].content, "Hi there");
        assert!(page.messages.iter().all(|m| m.client_token == Some(token)));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let state = build_state(ScriptedGenerator::replying(vec!["x"]), 20).await;
        let response = post_chat(&state, serde_json::json!({ "message": "   " })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(get_page(&state, 1).await.total, 0);
    }

    #[tokio::test]
    async fn test_unreachable_generator_persists_nothing() {
        let state = build_state(
            ScriptedGenerator {
                tokens: vec![],
                unreachable: true,
                completes: true,
            },
            20,
        )
        .await;
        let response = post_chat(&state, serde_json::json!({ "message": "Hello" })).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(get_page(&state, 1).await.total, 0);
    }

    #[tokio::test]
    async fn test_failed_generation_closes_without_done() {
        let state = build_state(
            ScriptedGenerator {
                tokens: vec!["par"],
                unreachable: false,
                completes: false,
            },
            20,
        )
        .await;
        let response = post_chat(&state, serde_json::json!({ "message": "Hello" })).await;
        let text = body_text(response).await;
        assert!(text.contains("\"par\""));
        assert!(!text.contains("done"));

        let page = get_page(&state, 1).await;
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_history_pages_are_clamped() {
        let state = build_state(ScriptedGenerator::replying(vec!["ok"]), 2).await;
        for text in ["a", "b", "c"] {
            let response = post_chat(&state, serde_json::json!({ "message": text })).await;
            body_text(response).await;
        }

        let first = get_page(&state, 1).await;
        assert_eq!(first.total, 6);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.messages[0].content, "c");

        let beyond = get_page(&state, 42).await;
        assert_eq!(beyond.messages[0].content, "a");
    }

    #[tokio::test]
    async fn test_clear_history() {
        let state = build_state(ScriptedGenerator::replying(vec!["ok"]), 20).await;
        body_text(post_chat(&state, serde_json::json!({ "message": "a" })).await).await;

        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/chat/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.clear_epoch(), 1);

        let page = get_page(&state, 1).await;
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
    }

    #[tokio::test]
    async fn test_reply_after_clear_is_not_stored() {
        let state = build_state(ScriptedGenerator::replying(vec!["late"]), 20).await;
        let response = post_chat(&state, serde_json::json!({ "message": "a" })).await;
        state.clear_history().await.unwrap();

        let text = body_text(response).await;
        assert!(text.contains("done"));
        assert_eq!(get_page(&state, 1).await.total, 0);
    }

    #[tokio::test]
    async fn test_notes_last_write_wins() {
        let state = build_state(ScriptedGenerator::replying(vec![]), 20).await;
        for content in ["draft", "final"] {
            let response = create_router(state.clone())
                .oneshot(
                    Request::builder()
                        .method("PUT")
                        .uri("/api/notes")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(
                            serde_json::json!({ "content": content }).to_string(),
                        ))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = create_router(state)
            .oneshot(Request::builder().uri("/api/notes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let doc: NotesDocument = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(doc.content, "final");
    }
}

// src/handlers/chat.rs
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{multipart::Multipart, ConnectInfo, DefaultBodyLimit, Extension, Form},
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::post,
    Router,
};
use futures::{pin_mut, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::file_processor;
use crate::models::chat::MessageRole;
use crate::models::file::{FileRef, FileType};
use crate::openai_client::build_messages;
use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::AppState;

pub fn chat_routes() -> Router {
    Router::new()
        .route("/api/chat/send", post(send_message))
        .route("/api/chat/send-simple", post(send_message_simple))
        // Well above the per-file limit so oversized uploads reach our own
        // size check and get a 413 with a useful message.
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
}

struct Upload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// Send a message with optional file uploads; responds with an SSE stream of
/// `token` events terminated by `done` or `error`.
async fn send_message(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    check_rate_limit(&state, addr).await?;

    let mut message: Option<String> = None;
    let mut conversation_id: Option<String> = None;
    let mut uploads: Vec<Upload> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "message" => {
                message = Some(field.text().await.map_err(|e| {
                    AppError::bad_request(format!("invalid message field: {e}"))
                })?);
            }
            "conversation_id" => {
                let value = field.text().await.map_err(|e| {
                    AppError::bad_request(format!("invalid conversation_id field: {e}"))
                })?;
                if !value.is_empty() {
                    conversation_id = Some(value);
                }
            }
            "files" => {
                let filename = match field.file_name() {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => continue,
                };
                let content_type = field.content_type().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    AppError::bad_request(format!("failed to read file '{filename}': {e}"))
                })?;
                uploads.push(Upload {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let message = message
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::bad_request("message is required"))?;

    // All size checks happen before anything is written.
    let max_bytes = state.config.max_file_size_bytes();
    for upload in &uploads {
        if upload.bytes.len() > max_bytes {
            return Err(AppError::payload_too_large(format!(
                "File {} exceeds {}MB limit",
                upload.filename, state.config.max_file_size_mb
            )));
        }
    }

    let conversation = match conversation_id {
        Some(id) => state
            .store
            .get_conversation(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation not found"))?,
        None => state.store.create_conversation(None).await?,
    };
    let conversation_id = conversation.id;

    let mut file_texts: Vec<(String, String)> = Vec::new();
    let mut image_data: Vec<String> = Vec::new();
    let mut file_refs: Vec<FileRef> = Vec::new();

    for upload in &uploads {
        let file_type = file_processor::classify(&upload.filename, &upload.content_type);

        let extracted = if file_type == FileType::Image {
            let content_type = if upload.content_type.is_empty() {
                "image/png"
            } else {
                &upload.content_type
            };
            let data_uri = file_processor::encode_image(&upload.bytes, content_type)
                .map_err(|e| AppError::bad_request(format!("File {}: {e}", upload.filename)))?;
            image_data.push(data_uri);
            None
        } else {
            let extracted = file_processor::extract_text(&upload.bytes, file_type);
            if let Some(text) = &extracted {
                if !text.is_empty() {
                    file_texts.push((upload.filename.clone(), text.clone()));
                }
            }
            extracted
        };

        let file_id = state
            .store
            .store_file(
                conversation_id,
                &upload.filename,
                &upload.content_type,
                upload.bytes.len() as i64,
                file_type.as_str(),
                extracted.as_deref(),
                &upload.bytes,
            )
            .await?;

        file_refs.push(FileRef {
            filename: upload.filename.clone(),
            content_type: upload.content_type.clone(),
            size: upload.bytes.len() as i64,
            file_type: file_type.as_str().to_string(),
            file_id: file_id.to_string(),
        });
    }

    state
        .store
        .add_message(conversation_id, MessageRole::User, &message, file_refs, 0)
        .await?;

    let history = state
        .store
        .get_messages(conversation_id, DEFAULT_HISTORY_LIMIT)
        .await?;

    // First message in the conversation: derive a title from it.
    if history.len() == 1 {
        let title = state.openai.generate_title(&message).await?;
        state.store.update_title(conversation_id, &title).await?;
    }

    let prior = &history[..history.len().saturating_sub(1)];
    let prompt = build_messages(prior, &message, &file_texts, &image_data);

    let openai = state.openai.clone();
    let store = state.store.clone();

    let stream = async_stream::stream! {
        match openai.chat_stream(prompt).await {
            Ok(tokens) => {
                pin_mut!(tokens);
                let mut accumulated = String::new();

                loop {
                    match tokens.next().await {
                        Some(Ok(token)) => {
                            accumulated.push_str(&token);
                            yield sse_event("token", json!({ "token": token }));
                        }
                        Some(Err(e)) => {
                            // Partial output is discarded, not persisted.
                            tracing::error!("Stream relay failed: {}", e);
                            yield sse_event("error", json!({ "error": e.to_string() }));
                            return;
                        }
                        None => break,
                    }
                }

                match store
                    .add_message(conversation_id, MessageRole::Assistant, &accumulated, Vec::new(), 0)
                    .await
                {
                    Ok(_) => {
                        yield sse_event(
                            "done",
                            json!({ "conversation_id": conversation_id.to_string() }),
                        );
                    }
                    Err(e) => {
                        tracing::error!("Failed to persist assistant message: {}", e);
                        yield sse_event("error", json!({ "error": e.to_string() }));
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to open completion stream: {}", e);
                yield sse_event("error", json!({ "error": e.to_string() }));
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct SendSimpleRequest {
    message: String,
    conversation_id: Option<String>,
}

/// Non-streaming variant for simpler clients.
async fn send_message_simple(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(state): Extension<Arc<AppState>>,
    Form(request): Form<SendSimpleRequest>,
) -> AppResult<Json<serde_json::Value>> {
    check_rate_limit(&state, addr).await?;

    if request.message.is_empty() {
        return Err(AppError::bad_request("message is required"));
    }

    let conversation = match request.conversation_id.filter(|id| !id.is_empty()) {
        Some(id) => state
            .store
            .get_conversation(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation not found"))?,
        None => state.store.create_conversation(None).await?,
    };
    let conversation_id = conversation.id;

    state
        .store
        .add_message(conversation_id, MessageRole::User, &request.message, Vec::new(), 0)
        .await?;

    let history = state
        .store
        .get_messages(conversation_id, DEFAULT_HISTORY_LIMIT)
        .await?;

    if history.len() == 1 {
        let title = state.openai.generate_title(&request.message).await?;
        state.store.update_title(conversation_id, &title).await?;
    }

    let prior = &history[..history.len().saturating_sub(1)];
    let prompt = build_messages(prior, &request.message, &[], &[]);
    let (content, tokens) = state.openai.chat_complete(prompt).await?;

    state
        .store
        .add_message(conversation_id, MessageRole::Assistant, &content, Vec::new(), tokens)
        .await?;

    Ok(Json(json!({
        "conversation_id": conversation_id.to_string(),
        "content": content,
        "tokens": tokens,
    })))
}

async fn check_rate_limit(state: &AppState, addr: SocketAddr) -> AppResult<()> {
    let allowed = match &state.cache {
        Some(cache) => cache.check_rate_limit(&addr.ip().to_string()).await,
        // No cache connection: fail open.
        None => true,
    };

    if allowed {
        Ok(())
    } else {
        tracing::warn!("Rate limit exceeded for IP: {}", addr.ip());
        Err(AppError::rate_limited(
            "Rate limit exceeded. Try again in a minute.",
        ))
    }
}

fn sse_event(name: &str, data: serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().event(name).data(data.to_string()))
}

// src/handlers/conversations.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::chat::{Conversation, ConversationListResponse, Message};
use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::AppState;

pub fn conversation_routes() -> Router {
    Router::new()
        .route("/api/conversations", get(list_conversations))
        .route(
            "/api/conversations/:conversation_id",
            get(get_conversation)
                .patch(update_conversation)
                .delete(delete_conversation),
        )
        .route(
            "/api/conversations/:conversation_id/messages",
            get(get_conversation_messages),
        )
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    skip: Option<i64>,
    limit: Option<i64>,
}

async fn list_conversations(
    Query(query): Query<ListQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Json<ConversationListResponse>> {
    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(50).clamp(1, 100);

    let (conversations, total) = state.store.list_conversations(skip, limit).await?;
    Ok(Json(ConversationListResponse {
        conversations,
        total,
    }))
}

async fn get_conversation(
    Path(conversation_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Json<Conversation>> {
    let conversation = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found("Conversation not found"))?;
    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    limit: Option<i64>,
}

async fn get_conversation_messages(
    Path(conversation_id): Path<String>,
    Query(query): Query<MessagesQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Json<Vec<Message>>> {
    let conversation = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found("Conversation not found"))?;

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 200);
    let messages = state.store.get_messages(conversation.id, limit).await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
struct UpdateQuery {
    title: String,
}

async fn update_conversation(
    Path(conversation_id): Path<String>,
    Query(query): Query<UpdateQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Json<serde_json::Value>> {
    let conversation = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found("Conversation not found"))?;

    state.store.update_title(conversation.id, &query.title).await?;
    Ok(Json(json!({ "status": "updated" })))
}

async fn delete_conversation(
    Path(conversation_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Json<serde_json::Value>> {
    let conversation = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found("Conversation not found"))?;

    state.store.delete_conversation(conversation.id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

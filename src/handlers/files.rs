// src/handlers/files.rs
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, Path},
    http::header,
    response::{Json, Response},
    routing::get,
    Router,
};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn file_routes() -> Router {
    Router::new()
        .route("/api/files/:file_id", get(get_file_metadata))
        .route("/api/files/:file_id/download", get(download_file))
        .route("/api/files/:file_id/text", get(get_file_text))
}

async fn get_file_metadata(
    Path(file_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Json<serde_json::Value>> {
    let file = state
        .store
        .get_file(&file_id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))?;

    Ok(Json(json!({
        "id": file.id.to_string(),
        "filename": file.filename,
        "content_type": file.content_type,
        "size": file.size,
        "file_type": file.file_type,
        "has_extracted_text": file.extracted_text.as_deref().is_some_and(|t| !t.is_empty()),
    })))
}

async fn download_file(
    Path(file_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Response> {
    let file = state
        .store
        .get_file(&file_id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))?;

    let data = state
        .store
        .get_file_data(&file_id)
        .await?
        .ok_or_else(|| AppError::not_found("File data not available"))?;

    Response::builder()
        .header(header::CONTENT_TYPE, file.content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.filename),
        )
        .body(Body::from(data))
        .map_err(AppError::internal)
}

async fn get_file_text(
    Path(file_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> AppResult<Json<serde_json::Value>> {
    let file = state
        .store
        .get_file(&file_id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))?;

    Ok(Json(json!({
        "filename": file.filename,
        "extracted_text": file.extracted_text.unwrap_or_default(),
    })))
}

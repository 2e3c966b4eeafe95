//! HTTP handlers for single-shot file operations.
//! Upload bodies are streamed into the object store and downloads are
//! streamed back out, so neither is buffered in memory.

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::json;
use std::io;

use crate::{errors::AppError, models::file::FileRecord, state::AppState};

/// `GET /api/files`: every file, newest first.
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.files.list().await?))
}

/// `GET /api/files/{id}`
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(state.files.get(id).await?))
}

/// `POST /api/files`: multipart form with a single `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("Error retrieving file"))?;
        let content_type = field.content_type().map(str::to_string);
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));

        let record = state
            .files
            .upload(&file_name, content_type.as_deref(), Box::pin(stream))
            .await?;

        return Ok(Json(json!({
            "message": "File uploaded successfully",
            "file": record,
        })));
    }

    Err(AppError::bad_request("Error retrieving file"))
}

/// `DELETE /api/files/{id}`: removes the stored object and its record.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.files.delete(id).await?;
    Ok(Json(json!({ "message": "File deleted successfully" })))
}

/// `GET /api/files/{id}/download`: stream the file as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let download = state.files.download(id).await?;

    let mut response = Response::new(Body::from_stream(download.body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&download.record.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

fn content_disposition(file_name: &str) -> String {
    let escaped: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", escaped)
}

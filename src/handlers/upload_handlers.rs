//! HTTP handlers for the multipart upload protocol.
//!
//! - `POST   /api/uploads/initiate`            open a session
//! - `POST   /api/uploads/{upload_id}/parts`    upload one part
//! - `POST   /api/uploads/{upload_id}/complete` assemble and record
//! - `DELETE /api/uploads/{upload_id}/abort`    discard

use axum::{
    Json,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::{
    errors::AppError,
    models::multipart::{CompletedPart, InitiatedUpload},
    services::object_store::bytes_stream,
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub file_name: String,
    #[serde(default)]
    pub content_type: String,
}

pub async fn initiate_upload(
    State(state): State<AppState>,
    payload: Result<Json<InitiateRequest>, JsonRejection>,
) -> Result<Json<InitiatedUpload>, AppError> {
    let Json(request) = payload.map_err(|_| AppError::bad_request("Invalid request format"))?;
    let started = state
        .uploads
        .initiate(&request.file_name, &request.content_type)
        .await?;
    Ok(Json(started))
}

/// Multipart form fields: `partNumber`, `file`, and optionally `size`.
///
/// The part is buffered so fields may arrive in any order. When `size` is
/// given the store checks it against the bytes received.
pub async fn upload_part(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<CompletedPart>, AppError> {
    let mut part_number: Option<String> = None;
    let mut declared_size: Option<String> = None;
    let mut data: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("partNumber") => part_number = Some(field.text().await?),
            Some("size") => declared_size = Some(field.text().await?),
            Some("file") => data = Some(field.bytes().await?),
            _ => {}
        }
    }

    let part_number = part_number
        .as_deref()
        .map(str::trim)
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|n| *n >= 1)
        .ok_or_else(|| AppError::bad_request("Invalid part number"))?;
    let data = data.ok_or_else(|| AppError::bad_request("Error retrieving file part"))?;
    let size = match declared_size.as_deref().map(str::trim) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| AppError::bad_request("Invalid part size"))?,
        None => data.len() as u64,
    };

    let part = state
        .uploads
        .upload_part(&upload_id, part_number, bytes_stream(data), size)
        .await?;
    Ok(Json(part))
}

pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.uploads.complete(&upload_id).await?;
    Ok(Json(json!({
        "message": "Multipart upload completed successfully",
        "file": record,
    })))
}

pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.uploads.abort(&upload_id).await?;
    Ok(Json(json!({ "message": "Upload aborted successfully" })))
}

//! Defines routes for the gateway API.
//!
//! ## Structure
//! - **File endpoints**
//!   - `GET    /api/files`               list files, newest first
//!   - `POST   /api/files`               single-shot upload (multipart form)
//!   - `GET    /api/files/{id}`          file record
//!   - `DELETE /api/files/{id}`          delete object and record
//!   - `GET    /api/files/{id}/download` stream file contents
//!
//! - **Multipart upload endpoints**
//!   - `POST   /api/uploads/initiate`
//!   - `POST   /api/uploads/{upload_id}/parts`
//!   - `POST   /api/uploads/{upload_id}/complete`
//!   - `DELETE /api/uploads/{upload_id}/abort`

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, get_file, list_files, upload_file},
        health_handlers::{health, readyz},
        upload_handlers::{abort_upload, complete_upload, initiate_upload, upload_part},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Headroom for multipart form boundaries and headers on top of the file.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Build the router for every gateway route.
///
/// `max_upload_bytes` caps request bodies; the file service enforces the
/// exact file size limit on its own.
pub fn routes(max_upload_bytes: u64) -> Router<AppState> {
    let body_limit = usize::try_from(max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        // File routes
        .route("/api/files", get(list_files).post(upload_file))
        .route("/api/files/{id}", get(get_file).delete(delete_file))
        .route("/api/files/{id}/download", get(download_file))
        // Multipart upload routes
        .route("/api/uploads/initiate", post(initiate_upload))
        .route("/api/uploads/{upload_id}/parts", post(upload_part))
        .route("/api/uploads/{upload_id}/complete", post(complete_upload))
        .route("/api/uploads/{upload_id}/abort", delete(abort_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

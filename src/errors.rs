use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{file_service::FileError, upload_coordinator::UploadError};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::EmptyFileName | UploadError::InvalidPartNumber(_) => {
                StatusCode::BAD_REQUEST
            }
            UploadError::NoParts(_) | UploadError::CompletionFailed { .. } => StatusCode::CONFLICT,
            UploadError::PartUploadFailed { .. } | UploadError::AbortFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            UploadError::StorageUnavailable(_) | UploadError::RegistryFull(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            UploadError::MetadataWriteFailed { .. } | UploadError::DuplicateUploadId(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        let status = match &err {
            FileError::NotFound(_) => StatusCode::NOT_FOUND,
            FileError::EmptyFileName => StatusCode::BAD_REQUEST,
            FileError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            FileError::Storage(_) | FileError::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), format!("Error parsing form: {}", err.body_text()))
    }
}

//! Represents a file that has been fully uploaded and indexed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Durable metadata row for one uploaded file.
///
/// A record exists only for uploads that finished, whether single-shot or
/// multipart. The bytes live in the object store under `object_key`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Primary key assigned by the metadata index.
    pub id: i64,

    /// Original name supplied by the client.
    #[serde(rename = "filename")]
    #[sqlx(rename = "filename")]
    pub file_name: String,

    /// Key of the backing object inside the gateway bucket.
    #[serde(rename = "filepath")]
    #[sqlx(rename = "filepath")]
    pub object_key: String,

    /// Size in bytes as reported by the object store.
    pub size: i64,

    /// When the upload finished.
    pub uploaded_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a [`FileRecord`]; the id is assigned on insert.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub file_name: String,
    pub object_key: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
}

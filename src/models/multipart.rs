//! Represents multipart upload sessions and parts.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::part_list::PartList;

/// An in-progress multipart upload, owned by the session registry.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadSession {
    /// Identifier issued by the object store when the session was opened.
    pub upload_id: String,

    /// Original file name, fixed for the lifetime of the session.
    pub file_name: String,

    /// Bucket the object is assembled in.
    pub bucket: String,

    /// Key the assembled object will live under. Derived once at initiation.
    pub object_key: String,

    /// MIME type supplied by the client.
    pub content_type: String,

    /// Parts uploaded so far.
    pub parts: PartList,

    /// When the session was opened.
    pub initiated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        upload_id: String,
        file_name: String,
        bucket: String,
        object_key: String,
        content_type: String,
    ) -> Self {
        Self {
            upload_id,
            file_name,
            bucket,
            object_key,
            content_type,
            parts: PartList::default(),
            initiated_at: Utc::now(),
        }
    }
}

/// One part as handed to the store's completion primitive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    /// Part number (1-based).
    pub part_number: u32,

    /// ETag returned by the store for this part.
    pub etag: String,
}

/// Result of opening a session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedUpload {
    pub upload_id: String,
    #[serde(rename = "objectName")]
    pub object_key: String,
}

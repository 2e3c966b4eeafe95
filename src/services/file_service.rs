//! Single-shot file operations: upload, list, fetch, download and delete.
//!
//! Each call is one store operation plus one index operation with no
//! session state, sharing the store, index and key generator with the
//! multipart coordinator.

use chrono::Utc;
use futures::StreamExt;
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::file::{FileRecord, NewFileRecord};
use crate::services::{
    metadata_index::{IndexError, MetadataIndex},
    object_keys::ObjectKeyGenerator,
    object_store::{ByteStream, ObjectStore, ObjectStream, StorageError, record_size},
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file {0} not found")]
    NotFound(i64),
    #[error("file name must not be empty")]
    EmptyFileName,
    #[error("file is too large (max {0} bytes)")]
    PayloadTooLarge(u64),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("metadata error: {0}")]
    Index(#[source] IndexError),
}

impl From<IndexError> for FileError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound(id) => FileError::NotFound(id),
            other => FileError::Index(other),
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;

/// Marker carried inside the `io::Error` raised when a body runs past the
/// size limit.
#[derive(Debug, Error)]
#[error("body exceeds {0} bytes")]
struct BodyTooLarge(u64);

/// A file ready to be streamed back to a client.
pub struct Download {
    pub record: FileRecord,
    pub content_type: String,
    pub size: u64,
    pub body: ObjectStream,
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
    keys: Arc<ObjectKeyGenerator>,
    bucket: String,
    max_upload_bytes: u64,
}

impl FileService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn MetadataIndex>,
        keys: Arc<ObjectKeyGenerator>,
        bucket: impl Into<String>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            index,
            keys,
            bucket: bucket.into(),
            max_upload_bytes,
        }
    }

    /// Store a whole file and record it.
    ///
    /// The body is cut off as soon as it passes `max_upload_bytes`. If the
    /// record cannot be written the stored object is removed again.
    pub async fn upload(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        body: ByteStream<'_>,
    ) -> FileResult<FileRecord> {
        if file_name.trim().is_empty() {
            return Err(FileError::EmptyFileName);
        }

        let object_key = self.keys.next_key(file_name);
        let limited = limit_body(body, self.max_upload_bytes);
        let stored = self
            .store
            .put_object(&self.bucket, &object_key, limited, None, content_type)
            .await
            .map_err(|err| match err {
                StorageError::Io(io_err) if is_too_large(&io_err) => {
                    FileError::PayloadTooLarge(self.max_upload_bytes)
                }
                other => FileError::Storage(other),
            })?;

        let record = match record_size(stored.size) {
            Ok(size) => {
                self.index
                    .create_file_record(NewFileRecord {
                        file_name: file_name.to_string(),
                        object_key: object_key.clone(),
                        size,
                        uploaded_at: Utc::now(),
                    })
                    .await
                    .map_err(FileError::from)
            }
            Err(err) => Err(FileError::Storage(err)),
        };
        match record {
            Ok(record) => {
                info!(file_id = record.id, object_key = %object_key, size = record.size, "file uploaded");
                Ok(record)
            }
            Err(err) => {
                if let Err(cleanup) = self.store.delete_object(&self.bucket, &object_key).await {
                    warn!(object_key = %object_key, "failed to remove unrecorded object: {}", cleanup);
                }
                Err(err)
            }
        }
    }

    pub async fn list(&self) -> FileResult<Vec<FileRecord>> {
        Ok(self.index.list_file_records().await?)
    }

    pub async fn get(&self, id: i64) -> FileResult<FileRecord> {
        Ok(self.index.get_file_record(id).await?)
    }

    pub async fn download(&self, id: i64) -> FileResult<Download> {
        let record = self.index.get_file_record(id).await?;
        let info = self.store.stat_object(&self.bucket, &record.object_key).await?;
        let body = self.store.get_object(&self.bucket, &record.object_key).await?;

        Ok(Download {
            record,
            content_type: info
                .content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: info.size,
            body,
        })
    }

    /// Remove the backing object, then the record.
    pub async fn delete(&self, id: i64) -> FileResult<()> {
        let record = self.index.get_file_record(id).await?;
        self.store
            .delete_object(&self.bucket, &record.object_key)
            .await?;
        self.index.delete_file_record(id).await?;
        info!(file_id = id, object_key = %record.object_key, "file deleted");
        Ok(())
    }
}

fn limit_body<'a>(body: ByteStream<'a>, max: u64) -> ByteStream<'a> {
    let mut seen: u64 = 0;
    Box::pin(body.map(move |chunk| {
        let chunk = chunk?;
        seen += chunk.len() as u64;
        if seen > max {
            return Err(io::Error::new(io::ErrorKind::InvalidData, BodyTooLarge(max)));
        }
        Ok(chunk)
    }))
}

fn is_too_large(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<BodyTooLarge>())
}

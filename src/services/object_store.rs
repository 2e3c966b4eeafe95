//! Object store adapter boundary.
//!
//! The gateway never touches raw bytes itself; it goes through an
//! [`ObjectStore`], which owns object payloads and the native multipart
//! primitives (open a session, upload a numbered part, assemble, abort).

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

use crate::models::multipart::CompletedPart;

/// Body passed into the store. May borrow from the request it came from.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Body handed out by the store.
pub type ObjectStream = ByteStream<'static>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("multipart upload `{0}` does not exist")]
    NoSuchUpload(String),
    #[error("part {part_number} rejected: {reason}")]
    InvalidPart { part_number: u32, reason: String },
    #[error("part {part_number} is {size} bytes, below the {min} byte minimum for non-final parts")]
    EntityTooSmall { part_number: u32, size: u64, min: u64 },
    #[error("declared size {declared} does not match {actual} bytes received")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("at least one part is required to complete an upload")]
    EmptyPartList,
    #[error("parts must be listed in strictly ascending order")]
    InvalidPartOrder,
    #[error("object size {0} does not fit a file record")]
    SizeOutOfRange(u64),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Convert a store-reported size to the signed column the index keeps.
pub fn record_size(size: u64) -> StorageResult<i64> {
    i64::try_from(size).map_err(|_| StorageError::SizeOutOfRange(size))
}

/// What the store knows about a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Key-based blob storage with native multipart support.
///
/// Checksums (etags) returned from [`ObjectStore::upload_part`] are opaque to
/// callers and must be handed back unchanged to
/// [`ObjectStore::complete_multipart`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Store a whole object, returning its etag.
    ///
    /// When `size` is given the body must be exactly that long.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream<'_>,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> StorageResult<ObjectInfo>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream>;

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo>;

    /// Remove an object. Removing an object that is already gone succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Open a multipart session and return its upload id.
    async fn open_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Upload one numbered part and return its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteStream<'_>,
        size: u64,
    ) -> StorageResult<String>;

    /// Assemble uploaded parts, given in strictly ascending order.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    /// Discard every part uploaded to a session.
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()>;
}

/// Wrap an in-memory buffer as an [`ObjectStream`].
pub fn bytes_stream(bytes: Bytes) -> ObjectStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

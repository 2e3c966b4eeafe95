//! src/services/disk_store.rs
//!
//! DiskObjectStore: [`ObjectStore`] backed by the local filesystem.
//! Objects are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`,
//! per-object metadata lives in a parallel `base_path/.meta/` tree, and
//! multipart sessions are staged under `base_path/.multipart/{upload_id}/`
//! until they are assembled or aborted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::multipart::CompletedPart;
use crate::services::object_store::{
    ByteStream, ObjectInfo, ObjectStore, ObjectStream, StorageError, StorageResult,
};
use crate::services::part_list::is_strictly_ascending;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MAX_PART_NUMBER: u32 = 10_000;
const MULTIPART_DIR: &str = ".multipart";
const META_DIR: &str = ".meta";
const SESSION_MANIFEST: &str = "session.json";
const SEALED_SUFFIX: &str = "sealed";

/// Sidecar written next to every stored object.
#[derive(Serialize, Deserialize, Debug)]
struct ObjectMeta {
    content_type: Option<String>,
    etag: String,
}

/// Written when a multipart session is opened; pins the session to one
/// bucket/key pair.
#[derive(Serialize, Deserialize, Debug)]
struct SessionManifest {
    bucket: String,
    key: String,
    content_type: String,
    initiated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    /// Root directory for buckets, metadata and multipart staging.
    base_path: PathBuf,

    /// Every part except the last must be at least this large.
    min_part_bytes: u64,
}

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, min_part_bytes: u64) -> Self {
        Self {
            base_path: base_path.into(),
            min_part_bytes,
        }
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers: the first two bytes of MD5(bucket/key).
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.base_path.join(META_DIR);
        path.push(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(format!("{}.json", key));
        path
    }

    /// Staging directory for a session. Upload ids are UUIDs issued by
    /// [`ObjectStore::open_multipart`]; anything else cannot exist.
    fn session_dir(&self, upload_id: &str) -> StorageResult<PathBuf> {
        let id = Uuid::parse_str(upload_id)
            .map_err(|_| StorageError::NoSuchUpload(upload_id.to_string()))?;
        Ok(self.base_path.join(MULTIPART_DIR).join(id.to_string()))
    }

    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("part-{:05}", part_number))
    }

    fn part_etag_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("part-{:05}.etag", part_number))
    }

    async fn require_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        ensure_bucket_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(StorageError::BucketNotFound(bucket.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::BucketNotFound(bucket.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Load a session manifest and check it belongs to `bucket`/`key`.
    async fn load_session(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(PathBuf, SessionManifest)> {
        let dir = self.session_dir(upload_id)?;
        let raw = match fs::read(dir.join(SESSION_MANIFEST)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NoSuchUpload(upload_id.to_string()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        let manifest: SessionManifest = serde_json::from_slice(&raw)?;
        if manifest.bucket != bucket || manifest.key != key {
            return Err(StorageError::NoSuchUpload(upload_id.to_string()));
        }
        Ok((dir, manifest))
    }

    async fn write_meta(&self, bucket: &str, key: &str, meta: &ObjectMeta) -> StorageResult<()> {
        let path = self.meta_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_vec(meta)?).await?;
        Ok(())
    }

    async fn read_meta(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match fs::read(self.meta_path(bucket, key)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Move a session's staging dir aside before it is finalized. Parts
    /// still in flight can then neither land in it nor recreate it.
    async fn seal_session(&self, dir: &Path, upload_id: &str) -> StorageResult<PathBuf> {
        let sealed = dir.with_extension(SEALED_SUFFIX);
        match fs::rename(dir, &sealed).await {
            Ok(()) => Ok(sealed),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NoSuchUpload(upload_id.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Put a sealed session back after finalizing it failed.
    async fn unseal_session(&self, sealed: &Path, dir: &Path) {
        if let Err(err) = fs::rename(sealed, dir).await {
            warn!("failed to reopen staging dir {}: {}", sealed.display(), err);
        }
    }

    /// Verify the sealed parts, then assemble and publish the object.
    async fn assemble_sealed(
        &self,
        sealed: &Path,
        bucket: &str,
        key: &str,
        parts: &[CompletedPart],
        manifest: SessionManifest,
    ) -> StorageResult<PathBuf> {
        for (idx, part) in parts.iter().enumerate() {
            let staged_etag =
                match fs::read_to_string(Self::part_etag_path(sealed, part.part_number)).await {
                    Ok(etag) => etag,
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        return Err(StorageError::InvalidPart {
                            part_number: part.part_number,
                            reason: "part was never uploaded".into(),
                        });
                    }
                    Err(err) => return Err(StorageError::Io(err)),
                };
            if staged_etag.trim() != part.etag {
                return Err(StorageError::InvalidPart {
                    part_number: part.part_number,
                    reason: "etag does not match the uploaded part".into(),
                });
            }

            let size = fs::metadata(Self::part_path(sealed, part.part_number))
                .await?
                .len();
            let is_last = idx + 1 == parts.len();
            if !is_last && size < self.min_part_bytes {
                return Err(StorageError::EntityTooSmall {
                    part_number: part.part_number,
                    size,
                    min: self.min_part_bytes,
                });
            }
        }

        let file_path = self.object_path(bucket, key);
        let parent = parent_dir(&file_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = self.assemble(sealed, parts, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        persist(&tmp_path, &file_path).await?;

        let content_type = Some(manifest.content_type).filter(|ct| !ct.is_empty());
        let meta = ObjectMeta {
            content_type,
            etag: multipart_etag(parts),
        };
        self.write_meta(bucket, key, &meta).await?;

        Ok(file_path)
    }

    /// Concatenate staged parts into a temp file next to `file_path`.
    async fn assemble(&self, dir: &Path, parts: &[CompletedPart], tmp_path: &Path) -> StorageResult<()> {
        let mut out = File::create(tmp_path).await?;
        for part in parts {
            let mut src = File::open(Self::part_path(dir, part.part_number)).await?;
            tokio::io::copy(&mut src, &mut out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        Ok(())
    }

    /// Remove empty directories from `start` upward, stopping at `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        ensure_bucket_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        if fs::metadata(&root).await.is_err() {
            fs::create_dir_all(&root).await?;
            tracing::info!("created bucket directory {}", root.display());
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream<'_>,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> StorageResult<ObjectInfo> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        let file_path = self.object_path(bucket, key);
        let parent = parent_dir(&file_path)?;
        fs::create_dir_all(&parent).await?;
        let (tmp_path, written, etag) = write_stream_to_temp(&parent, body).await?;

        if let Some(declared) = size {
            if declared != written {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::SizeMismatch {
                    declared,
                    actual: written,
                });
            }
        }

        persist(&tmp_path, &file_path).await?;
        let meta = ObjectMeta {
            content_type: content_type.map(str::to_string),
            etag: etag.clone(),
        };
        self.write_meta(bucket, key, &meta).await?;
        debug!("stored {} bytes at {}", written, file_path.display());

        Ok(ObjectInfo {
            size: written,
            content_type: meta.content_type,
            etag: Some(etag),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        let metadata = fs::metadata(self.object_path(bucket, key))
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;
        let meta = self.read_meta(bucket, key).await?;
        let (content_type, etag) = match meta {
            Some(meta) => (meta.content_type, Some(meta.etag)),
            None => (None, None),
        };

        Ok(ObjectInfo {
            size: metadata.len(),
            content_type,
            etag,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let bucket_root = self.require_bucket(bucket).await?;

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        let meta_path = self.meta_path(bucket, key);
        match fs::remove_file(&meta_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = meta_path.parent() {
            let meta_root = self.base_path.join(META_DIR).join(bucket);
            self.prune_empty_dirs(parent, &meta_root).await;
        }

        Ok(())
    }

    async fn open_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        let upload_id = Uuid::new_v4().to_string();
        let dir = self.session_dir(&upload_id)?;
        fs::create_dir_all(&dir).await?;

        let manifest = SessionManifest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            initiated_at: Utc::now(),
        };
        fs::write(dir.join(SESSION_MANIFEST), serde_json::to_vec(&manifest)?).await?;
        debug!("opened multipart session {} for {}/{}", upload_id, bucket, key);

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteStream<'_>,
        size: u64,
    ) -> StorageResult<String> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(StorageError::InvalidPart {
                part_number,
                reason: format!("part number must be between 1 and {}", MAX_PART_NUMBER),
            });
        }
        let (dir, _) = self.load_session(upload_id, bucket, key).await?;
        // The staging dir is never recreated here. Once complete or abort
        // has sealed it, every write below fails with `NoSuchUpload`.
        let session_gone = |err: io::Error| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NoSuchUpload(upload_id.to_string())
            } else {
                StorageError::Io(err)
            }
        };

        let (tmp_path, written, etag) =
            write_stream_to_temp(&dir, body).await.map_err(|err| match err {
                StorageError::Io(io_err) => session_gone(io_err),
                other => other,
            })?;
        if written != size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::SizeMismatch {
                declared: size,
                actual: written,
            });
        }

        // Old etag goes first so a half-replaced part never verifies.
        let etag_path = Self::part_etag_path(&dir, part_number);
        match fs::remove_file(&etag_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = fs::rename(&tmp_path, Self::part_path(&dir, part_number)).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(session_gone(err));
        }
        fs::write(&etag_path, &etag).await.map_err(session_gone)?;
        debug!("staged part {} of {} ({} bytes)", part_number, upload_id, written);

        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let (dir, manifest) = self.load_session(upload_id, bucket, key).await?;
        if parts.is_empty() {
            return Err(StorageError::EmptyPartList);
        }
        if !is_strictly_ascending(parts) {
            return Err(StorageError::InvalidPartOrder);
        }

        let sealed = self.seal_session(&dir, upload_id).await?;
        let file_path = match self.assemble_sealed(&sealed, bucket, key, parts, manifest).await {
            Ok(file_path) => file_path,
            Err(err) => {
                self.unseal_session(&sealed, &dir).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::remove_dir_all(&sealed).await {
            debug!("failed to remove staging dir {}: {}", sealed.display(), err);
        }
        debug!(
            "assembled {} parts of {} into {}",
            parts.len(),
            upload_id,
            file_path.display()
        );

        Ok(())
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()> {
        let (dir, _) = self.load_session(upload_id, bucket, key).await?;
        let sealed = self.seal_session(&dir, upload_id).await?;
        if let Err(err) = fs::remove_dir_all(&sealed).await {
            self.unseal_session(&sealed, &dir).await;
            return Err(StorageError::Io(err));
        }
        debug!("discarded multipart session {}", upload_id);
        Ok(())
    }
}

/// Stream a body into a fresh temp file inside `dir`, which must exist.
///
/// Computes size and MD5 while writing, fsyncs, and removes the temp file
/// again if anything fails. Returns the temp path for the caller to rename.
async fn write_stream_to_temp(
    dir: &Path,
    mut stream: ByteStream<'_>,
) -> StorageResult<(PathBuf, u64, String)> {
    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    let mut size: u64 = 0;
    let mut digest = Context::new();
    while let Some(chunk_res) = stream.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };
        size += chunk.len() as u64;
        digest.consume(&chunk);
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::Io(err));
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::Io(err));
    }

    Ok((tmp_path, size, format!("{:x}", digest.compute())))
}

/// Atomically move a finished temp file into place.
async fn persist(tmp_path: &Path, final_path: &Path) -> StorageResult<()> {
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    if let Err(err) = fs::rename(tmp_path, final_path).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(final_path).await?;
            fs::rename(tmp_path, final_path).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StorageError::Io(err));
        }
    }
    Ok(())
}

fn parent_dir(path: &Path) -> StorageResult<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StorageError::Io(io::Error::new(
            ErrorKind::Other,
            "object path missing parent directory",
        ))
    })
}

fn not_found_or_io(err: io::Error, bucket: &str, key: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StorageError::Io(err)
    }
}

/// S3-style etag for an assembled object: MD5 over the part etags, suffixed
/// with the part count.
fn multipart_etag(parts: &[CompletedPart]) -> String {
    let mut digest = Context::new();
    for part in parts {
        digest.consume(part.etag.as_bytes());
    }
    format!("{:x}-{}", digest.compute(), parts.len())
}

/// Reject keys that could escape the bucket directory.
fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// S3-like bucket naming rules: 3–63 chars of lowercase letters, digits,
/// dots and hyphens, alphanumeric at both ends, no `..`, not an IPv4 address.
fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_store::bytes_stream;
    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    const BUCKET: &str = "uploads";

    /// A body that signals once the store starts reading it, then yields
    /// `data` only after the release sender fires.
    fn held_body(data: &'static [u8]) -> (ObjectStream, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (reading_tx, reading_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let body = futures::stream::once(async move {
            let _ = reading_tx.send(());
            let _ = release_rx.await;
            Ok(Bytes::from_static(data))
        });
        (Box::pin(body), reading_rx, release_tx)
    }

    fn staging_entries(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path().join(MULTIPART_DIR)).unwrap().count()
    }

    async fn store(min_part_bytes: u64) -> (TempDir, DiskObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = DiskObjectStore::new(dir.path(), min_part_bytes);
        store.ensure_bucket(BUCKET).await.unwrap();
        (dir, store)
    }

    async fn read_all(mut stream: ObjectStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn put_part(
        store: &DiskObjectStore,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: &'static [u8],
    ) -> CompletedPart {
        let etag = store
            .upload_part(
                BUCKET,
                key,
                upload_id,
                part_number,
                bytes_stream(Bytes::from_static(data)),
                data.len() as u64,
            )
            .await
            .unwrap();
        CompletedPart { part_number, etag }
    }

    #[tokio::test]
    async fn put_get_stat_delete() {
        let (_dir, store) = store(0).await;
        let info = store
            .put_object(
                BUCKET,
                "1-hello.txt",
                bytes_stream(Bytes::from_static(b"hello")),
                Some(5),
                Some("text/plain"),
            )
            .await
            .unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));

        let body = read_all(store.get_object(BUCKET, "1-hello.txt").await.unwrap()).await;
        assert_eq!(body, b"hello");

        let stat = store.stat_object(BUCKET, "1-hello.txt").await.unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.content_type.as_deref(), Some("text/plain"));

        store.delete_object(BUCKET, "1-hello.txt").await.unwrap();
        assert!(matches!(
            store.stat_object(BUCKET, "1-hello.txt").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        // deleting again is fine
        store.delete_object(BUCKET, "1-hello.txt").await.unwrap();
    }

    #[tokio::test]
    async fn put_rejects_size_mismatch_and_unsafe_keys() {
        let (_dir, store) = store(0).await;
        let err = store
            .put_object(BUCKET, "k", bytes_stream(Bytes::from_static(b"abc")), Some(4), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SizeMismatch { declared: 4, actual: 3 }));

        let err = store
            .put_object(BUCKET, "../escape", bytes_stream(Bytes::new()), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey));
    }

    #[tokio::test]
    async fn missing_bucket_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = DiskObjectStore::new(dir.path(), 0);
        let err = store.open_multipart("nope-bucket", "k", "text/plain").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn multipart_assembles_parts_in_given_order() {
        let (_dir, store) = store(0).await;
        let upload_id = store.open_multipart(BUCKET, "big.bin", "application/pdf").await.unwrap();

        let p3 = put_part(&store, "big.bin", &upload_id, 3, b"ccc").await;
        let p1 = put_part(&store, "big.bin", &upload_id, 1, b"aaa").await;
        let p2 = put_part(&store, "big.bin", &upload_id, 2, b"bbb").await;

        store
            .complete_multipart(BUCKET, "big.bin", &upload_id, &[p1, p2, p3])
            .await
            .unwrap();

        let body = read_all(store.get_object(BUCKET, "big.bin").await.unwrap()).await;
        assert_eq!(body, b"aaabbbccc");
        let stat = store.stat_object(BUCKET, "big.bin").await.unwrap();
        assert_eq!(stat.size, 9);
        assert_eq!(stat.content_type.as_deref(), Some("application/pdf"));
        assert!(stat.etag.unwrap().ends_with("-3"));

        // staging is gone once assembled
        assert!(matches!(
            store.abort_multipart(BUCKET, "big.bin", &upload_id).await,
            Err(StorageError::NoSuchUpload(_))
        ));
    }

    #[tokio::test]
    async fn complete_rejects_bad_part_lists() {
        let (_dir, store) = store(4).await;
        let upload_id = store.open_multipart(BUCKET, "k.bin", "").await.unwrap();
        let p1 = put_part(&store, "k.bin", &upload_id, 1, b"ab").await;
        let p2 = put_part(&store, "k.bin", &upload_id, 2, b"cd").await;

        let err = store.complete_multipart(BUCKET, "k.bin", &upload_id, &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::EmptyPartList));

        let err = store
            .complete_multipart(BUCKET, "k.bin", &upload_id, &[p2.clone(), p1.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPartOrder));

        let err = store
            .complete_multipart(BUCKET, "k.bin", &upload_id, &[p1.clone(), p2.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EntityTooSmall { part_number: 1, .. }));

        let forged = CompletedPart { part_number: 1, etag: "nope".into() };
        let err = store
            .complete_multipart(BUCKET, "k.bin", &upload_id, &[forged])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPart { part_number: 1, .. }));

        // a single small final part is fine and the session survived the failures
        store.complete_multipart(BUCKET, "k.bin", &upload_id, &[p2]).await.unwrap();
        let body = read_all(store.get_object(BUCKET, "k.bin").await.unwrap()).await;
        assert_eq!(body, b"cd");
    }

    #[tokio::test]
    async fn upload_part_validates_inputs() {
        let (_dir, store) = store(0).await;
        let upload_id = store.open_multipart(BUCKET, "k.bin", "").await.unwrap();

        let err = store
            .upload_part(BUCKET, "k.bin", &upload_id, 0, bytes_stream(Bytes::new()), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPart { part_number: 0, .. }));

        let err = store
            .upload_part(BUCKET, "k.bin", &upload_id, 1, bytes_stream(Bytes::from_static(b"xy")), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SizeMismatch { .. }));

        let err = store
            .upload_part(BUCKET, "other.bin", &upload_id, 1, bytes_stream(Bytes::new()), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchUpload(_)));

        let err = store
            .upload_part(BUCKET, "k.bin", "not-a-uuid", 1, bytes_stream(Bytes::new()), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchUpload(_)));
    }

    #[tokio::test]
    async fn reuploading_a_part_overwrites_it() {
        let (_dir, store) = store(0).await;
        let upload_id = store.open_multipart(BUCKET, "k.bin", "").await.unwrap();
        let _old = put_part(&store, "k.bin", &upload_id, 1, b"old").await;
        let new = put_part(&store, "k.bin", &upload_id, 1, b"new!").await;

        store.complete_multipart(BUCKET, "k.bin", &upload_id, &[new]).await.unwrap();
        let body = read_all(store.get_object(BUCKET, "k.bin").await.unwrap()).await;
        assert_eq!(body, b"new!");
    }

    #[tokio::test]
    async fn abort_discards_staged_parts() {
        let (dir, store) = store(0).await;
        let upload_id = store.open_multipart(BUCKET, "k.bin", "").await.unwrap();
        put_part(&store, "k.bin", &upload_id, 1, b"data").await;

        store.abort_multipart(BUCKET, "k.bin", &upload_id).await.unwrap();
        assert_eq!(staging_entries(&dir), 0);
        assert!(matches!(
            store.stat_object(BUCKET, "k.bin").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn part_racing_abort_does_not_recreate_staging() {
        let (dir, store) = store(0).await;
        let upload_id = store.open_multipart(BUCKET, "k.bin", "").await.unwrap();

        let (body, reading, release) = held_body(b"late");
        let racer = store.clone();
        let id = upload_id.clone();
        let late = tokio::spawn(async move {
            racer.upload_part(BUCKET, "k.bin", &id, 1, body, 4).await
        });
        reading.await.unwrap();

        store.abort_multipart(BUCKET, "k.bin", &upload_id).await.unwrap();
        release.send(()).unwrap();

        let err = late.await.unwrap().unwrap_err();
        assert!(matches!(err, StorageError::NoSuchUpload(id) if id == upload_id));
        assert_eq!(staging_entries(&dir), 0);
    }

    #[tokio::test]
    async fn reupload_racing_complete_cannot_swap_a_verified_part() {
        let (dir, store) = store(0).await;
        let upload_id = store.open_multipart(BUCKET, "k.bin", "").await.unwrap();
        let verified = put_part(&store, "k.bin", &upload_id, 1, b"original").await;

        let (body, reading, release) = held_body(b"swapped!");
        let racer = store.clone();
        let id = upload_id.clone();
        let late = tokio::spawn(async move {
            racer.upload_part(BUCKET, "k.bin", &id, 1, body, 8).await
        });
        reading.await.unwrap();

        store
            .complete_multipart(BUCKET, "k.bin", &upload_id, &[verified])
            .await
            .unwrap();
        release.send(()).unwrap();

        assert!(matches!(
            late.await.unwrap(),
            Err(StorageError::NoSuchUpload(_))
        ));
        let body = read_all(store.get_object(BUCKET, "k.bin").await.unwrap()).await;
        assert_eq!(body, b"original");
        assert_eq!(staging_entries(&dir), 0);
    }

    #[tokio::test]
    async fn failed_complete_leaves_session_usable() {
        let (_dir, store) = store(0).await;
        let upload_id = store.open_multipart(BUCKET, "k.bin", "").await.unwrap();
        let part = put_part(&store, "k.bin", &upload_id, 1, b"data").await;

        let wrong = CompletedPart {
            part_number: 1,
            etag: "not-the-etag".into(),
        };
        assert!(matches!(
            store.complete_multipart(BUCKET, "k.bin", &upload_id, &[wrong]).await,
            Err(StorageError::InvalidPart { part_number: 1, .. })
        ));

        let second = put_part(&store, "k.bin", &upload_id, 2, b"more").await;
        store
            .complete_multipart(BUCKET, "k.bin", &upload_id, &[part, second])
            .await
            .unwrap();
        let body = read_all(store.get_object(BUCKET, "k.bin").await.unwrap()).await;
        assert_eq!(body, b"datamore");
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("uploads").is_ok());
        assert!(ensure_bucket_name_safe("my.bucket-1").is_ok());
        assert!(ensure_bucket_name_safe("ab").is_err());
        assert!(ensure_bucket_name_safe("Uploads").is_err());
        assert!(ensure_bucket_name_safe("-uploads").is_err());
        assert!(ensure_bucket_name_safe("a..b").is_err());
        assert!(ensure_bucket_name_safe("192.168.0.1").is_err());
        assert!(ensure_bucket_name_safe(".multipart").is_err());
    }
}

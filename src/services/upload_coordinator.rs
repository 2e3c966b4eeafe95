//! Multipart upload coordinator.
//!
//! Drives the four-phase protocol over the session registry, the object
//! store and the metadata index:
//!
//! 1. `initiate` opens a store session and registers it.
//! 2. `upload_part` forwards one part to the store and records its etag.
//! 3. `complete` freezes the session, assembles the parts in ascending
//!    order, stats the result and writes exactly one [`FileRecord`].
//! 4. `abort` freezes the session and discards its parts.
//!
//! A failed complete or abort puts the session back to open so the caller
//! can retry. Nothing is retried here.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{
    file::{FileRecord, NewFileRecord},
    multipart::{CompletedPart, InitiatedUpload, UploadSession},
};
use crate::services::{
    metadata_index::{IndexError, MetadataIndex},
    object_keys::ObjectKeyGenerator,
    object_store::{ByteStream, ObjectStore, StorageError, record_size},
    session_registry::{RegistryError, SessionRegistry},
};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload `{0}` not found or already finished")]
    SessionNotFound(String),
    #[error("file name must not be empty")]
    EmptyFileName,
    #[error("invalid part number {0}: part numbers start at 1")]
    InvalidPartNumber(u32),
    #[error("upload `{0}` has no parts to complete")]
    NoParts(String),
    #[error("too many uploads in progress (limit {0})")]
    RegistryFull(usize),
    #[error("store issued upload id `{0}` twice")]
    DuplicateUploadId(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),
    #[error("part {part_number} of upload `{upload_id}` rejected: {source}")]
    PartUploadFailed {
        upload_id: String,
        part_number: u32,
        #[source]
        source: StorageError,
    },
    #[error("completing upload `{upload_id}` failed: {source}")]
    CompletionFailed {
        upload_id: String,
        #[source]
        source: StorageError,
    },
    #[error("aborting upload `{upload_id}` failed: {source}")]
    AbortFailed {
        upload_id: String,
        #[source]
        source: StorageError,
    },
    #[error("upload `{upload_id}` was assembled but its record could not be written: {source}")]
    MetadataWriteFailed {
        upload_id: String,
        #[source]
        source: IndexError,
    },
}

impl From<RegistryError> for UploadError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => UploadError::SessionNotFound(id),
            RegistryError::Full(limit) => UploadError::RegistryFull(limit),
            RegistryError::AlreadyExists(id) => UploadError::DuplicateUploadId(id),
        }
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
    registry: Arc<SessionRegistry>,
    keys: Arc<ObjectKeyGenerator>,
    bucket: String,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn MetadataIndex>,
        registry: Arc<SessionRegistry>,
        keys: Arc<ObjectKeyGenerator>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index,
            registry,
            keys,
            bucket: bucket.into(),
        }
    }

    /// Open a new multipart session for `file_name`.
    pub async fn initiate(&self, file_name: &str, content_type: &str) -> UploadResult<InitiatedUpload> {
        if file_name.trim().is_empty() {
            return Err(UploadError::EmptyFileName);
        }
        let reservation = self.registry.reserve().inspect_err(|err| {
            warn!("refusing new upload for {}: {}", file_name, err);
        })?;

        let object_key = self.keys.next_key(file_name);
        let upload_id = self
            .store
            .open_multipart(&self.bucket, &object_key, content_type)
            .await
            .map_err(|err| {
                warn!("storage unavailable opening upload for {}: {}", object_key, err);
                UploadError::StorageUnavailable(err)
            })?;

        let session = UploadSession::new(
            upload_id.clone(),
            file_name.to_string(),
            self.bucket.clone(),
            object_key.clone(),
            content_type.to_string(),
        );
        if let Err(err) = reservation.commit(session) {
            if let Err(abort_err) = self
                .store
                .abort_multipart(&self.bucket, &object_key, &upload_id)
                .await
            {
                warn!(upload_id = %upload_id, "failed to discard unregistered session: {}", abort_err);
            }
            return Err(err.into());
        }

        info!(upload_id = %upload_id, object_key = %object_key, "multipart upload initiated");
        Ok(InitiatedUpload {
            upload_id,
            object_key,
        })
    }

    /// Forward one part to the store and record its etag.
    ///
    /// Uploading a part number again replaces the earlier part.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        body: ByteStream<'_>,
        size: u64,
    ) -> UploadResult<CompletedPart> {
        if part_number == 0 {
            return Err(UploadError::InvalidPartNumber(part_number));
        }
        let session = self.registry.get(upload_id).inspect_err(|_| {
            warn!(upload_id = %upload_id, "part upload for unknown session");
        })?;

        let stored = self
            .store
            .upload_part(
                &session.bucket,
                &session.object_key,
                upload_id,
                part_number,
                body,
                size,
            )
            .await;
        let etag = match stored {
            Ok(etag) => etag,
            // Complete or abort ended the session while the part was in flight.
            Err(StorageError::NoSuchUpload(_)) => {
                warn!(upload_id = %upload_id, part_number, "session ended during part upload");
                return Err(UploadError::SessionNotFound(upload_id.to_string()));
            }
            Err(_) if self.registry.get(upload_id).is_err() => {
                warn!(upload_id = %upload_id, part_number, "session ended during part upload");
                return Err(UploadError::SessionNotFound(upload_id.to_string()));
            }
            Err(source) => {
                warn!(upload_id = %upload_id, part_number, "part rejected by store: {}", source);
                return Err(UploadError::PartUploadFailed {
                    upload_id: upload_id.to_string(),
                    part_number,
                    source,
                });
            }
        };

        // Fails when complete or abort froze the session mid-upload.
        let replaced = self
            .registry
            .append_part(upload_id, part_number, etag.clone())
            .inspect_err(|_| {
                warn!(upload_id = %upload_id, part_number, "session finalized before part was recorded");
            })?;
        if replaced.is_some() {
            debug!(upload_id = %upload_id, part_number, "part re-uploaded, replacing previous etag");
        }

        debug!(upload_id = %upload_id, part_number, size, "part uploaded");
        Ok(CompletedPart { part_number, etag })
    }

    /// Assemble the session's parts and publish one [`FileRecord`].
    pub async fn complete(&self, upload_id: &str) -> UploadResult<FileRecord> {
        let session = self.registry.begin_finalize(upload_id).inspect_err(|_| {
            warn!(upload_id = %upload_id, "complete for unknown session");
        })?;

        let parts = session.parts.ordered();
        if parts.is_empty() {
            self.reopen(upload_id);
            return Err(UploadError::NoParts(upload_id.to_string()));
        }

        if let Err(source) = self
            .store
            .complete_multipart(&session.bucket, &session.object_key, upload_id, &parts)
            .await
        {
            warn!(upload_id = %upload_id, "store rejected assembly: {}", source);
            self.reopen(upload_id);
            return Err(UploadError::CompletionFailed {
                upload_id: upload_id.to_string(),
                source,
            });
        }

        // The store session is consumed from here on; failures cannot be
        // retried, so the registry entry always goes.
        let size = match self
            .store
            .stat_object(&session.bucket, &session.object_key)
            .await
            .and_then(|info| record_size(info.size))
        {
            Ok(size) => size,
            Err(err) => {
                warn!(upload_id = %upload_id, "storage unavailable reading assembled size: {}", err);
                self.discard_assembled(&session).await;
                self.forget(upload_id);
                return Err(UploadError::StorageUnavailable(err));
            }
        };

        let record = self
            .index
            .create_file_record(NewFileRecord {
                file_name: session.file_name.clone(),
                object_key: session.object_key.clone(),
                size,
                uploaded_at: Utc::now(),
            })
            .await;
        let record = match record {
            Ok(record) => record,
            Err(source) => {
                error!(upload_id = %upload_id, "metadata write failed after assembly: {}", source);
                self.discard_assembled(&session).await;
                self.forget(upload_id);
                return Err(UploadError::MetadataWriteFailed {
                    upload_id: upload_id.to_string(),
                    source,
                });
            }
        };

        self.forget(upload_id);
        info!(
            upload_id = %upload_id,
            file_id = record.id,
            parts = parts.len(),
            size = record.size,
            "multipart upload completed"
        );
        Ok(record)
    }

    /// Discard every uploaded part of the session.
    pub async fn abort(&self, upload_id: &str) -> UploadResult<()> {
        let session = self.registry.begin_finalize(upload_id).inspect_err(|_| {
            warn!(upload_id = %upload_id, "abort for unknown session");
        })?;

        if let Err(source) = self
            .store
            .abort_multipart(&session.bucket, &session.object_key, upload_id)
            .await
        {
            warn!(upload_id = %upload_id, "store failed to abort: {}", source);
            self.reopen(upload_id);
            return Err(UploadError::AbortFailed {
                upload_id: upload_id.to_string(),
                source,
            });
        }

        self.forget(upload_id);
        info!(upload_id = %upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Abort every open session initiated more than `ttl` ago. Returns the
    /// number aborted.
    pub async fn reap_stale(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;

        let mut reaped = 0;
        for upload_id in self.registry.stale(cutoff) {
            match self.abort(&upload_id).await {
                Ok(()) => reaped += 1,
                // finished concurrently
                Err(UploadError::SessionNotFound(_)) => {}
                Err(err) => warn!(upload_id = %upload_id, "failed to reap stale session: {}", err),
            }
        }
        if reaped > 0 {
            info!("reaped {} stale upload sessions", reaped);
        }
        reaped
    }

    /// Run [`UploadCoordinator::reap_stale`] every `every` until the task is
    /// aborted.
    pub fn spawn_reaper(&self, ttl: Duration, every: Duration) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                coordinator.reap_stale(ttl).await;
            }
        })
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    fn reopen(&self, upload_id: &str) {
        if let Err(err) = self.registry.reopen(upload_id) {
            warn!(upload_id = %upload_id, "could not reopen session: {}", err);
        }
    }

    fn forget(&self, upload_id: &str) {
        if let Err(err) = self.registry.remove(upload_id) {
            warn!(upload_id = %upload_id, "session already removed: {}", err);
        }
    }

    /// Best-effort removal of an assembled object that will never get a
    /// record.
    async fn discard_assembled(&self, session: &UploadSession) {
        if let Err(err) = self
            .store
            .delete_object(&session.bucket, &session.object_key)
            .await
        {
            warn!(
                upload_id = %session.upload_id,
                object_key = %session.object_key,
                "orphaned assembled object left in store: {}",
                err
            );
        }
    }
}

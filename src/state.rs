//! Shared state handed to every handler.

use sqlx::SqlitePool;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::config::AppConfig;
use crate::services::{
    disk_store::DiskObjectStore,
    file_service::FileService,
    metadata_index::{SqliteIndex, open_pool, run_migrations},
    object_keys::ObjectKeyGenerator,
    object_store::ObjectStore,
    session_registry::SessionRegistry,
    upload_coordinator::UploadCoordinator,
};

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadCoordinator,
    pub files: FileService,

    /// Pool behind the metadata index, used by the readiness probe.
    pub db: Arc<SqlitePool>,

    /// Root of the disk object store, used by the readiness probe.
    pub storage_dir: PathBuf,
}

impl AppState {
    /// Wire up the disk store, the SQLite index and both upload paths for
    /// `cfg`. Creates the storage directory and bucket when missing and
    /// applies the schema.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let storage_dir = PathBuf::from(&cfg.storage_dir);
        if !storage_dir.exists() {
            std::fs::create_dir_all(&storage_dir)?;
            tracing::info!("Created storage directory at {}", storage_dir.display());
        }
        let store = Arc::new(DiskObjectStore::new(&storage_dir, cfg.min_part_bytes));
        store.ensure_bucket(&cfg.bucket).await?;

        ensure_sqlite_parent(&cfg.database_url)?;
        let db = Arc::new(open_pool(&cfg.database_url).await?);
        run_migrations(&db).await?;
        let index = Arc::new(SqliteIndex::new(db.clone()));

        let keys = Arc::new(ObjectKeyGenerator::new());
        let registry = Arc::new(SessionRegistry::new(cfg.max_sessions));

        let uploads = UploadCoordinator::new(
            store.clone(),
            index.clone(),
            registry,
            keys.clone(),
            cfg.bucket.clone(),
        );
        let files = FileService::new(store, index, keys, cfg.bucket.clone(), cfg.max_upload_bytes);

        Ok(Self {
            uploads,
            files,
            db,
            storage_dir,
        })
    }
}

/// Create the directory holding a file-backed SQLite database.
pub fn ensure_sqlite_parent(database_url: &str) -> std::io::Result<()> {
    if database_url.contains(":memory:") {
        return Ok(());
    }
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}

//! Metadata index: the relational record of every finished upload.
//!
//! [`SqliteIndex`] is the shipped implementation. Deletes are soft: the row
//! keeps its data but gets a `deleted_at` stamp and disappears from reads
//! and listings.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;

use crate::models::file::{FileRecord, NewFileRecord};

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("file record {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

#[async_trait]
pub trait MetadataIndex: Send + Sync + 'static {
    async fn create_file_record(&self, record: NewFileRecord) -> IndexResult<FileRecord>;

    async fn get_file_record(&self, id: i64) -> IndexResult<FileRecord>;

    /// All live records, newest upload first.
    async fn list_file_records(&self) -> IndexResult<Vec<FileRecord>>;

    async fn delete_file_record(&self, id: i64) -> IndexResult<()>;
}

#[derive(Clone)]
pub struct SqliteIndex {
    db: Arc<SqlitePool>,
}

impl SqliteIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

/// Open a pool for `database_url`, creating the database file if needed.
///
/// In-memory databases are per-connection in SQLite, so they get a single
/// connection.
pub async fn open_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

#[async_trait]
impl MetadataIndex for SqliteIndex {
    async fn create_file_record(&self, record: NewFileRecord) -> IndexResult<FileRecord> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO files (filename, filepath, size, uploaded_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, filename, filepath, size, uploaded_at, created_at, updated_at
            "#,
        )
        .bind(&record.file_name)
        .bind(&record.object_key)
        .bind(record.size)
        .bind(record.uploaded_at)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;

        Ok(row)
    }

    async fn get_file_record(&self, id: i64) -> IndexResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, filepath, size, uploaded_at, created_at, updated_at
             FROM files WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => IndexError::NotFound(id),
            other => IndexError::Sqlx(other),
        })
    }

    async fn list_file_records(&self) -> IndexResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, filepath, size, uploaded_at, created_at, updated_at
             FROM files WHERE deleted_at IS NULL
             ORDER BY uploaded_at DESC, id DESC",
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(rows)
    }

    async fn delete_file_record(&self, id: i64) -> IndexResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE files SET deleted_at = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(id));
        }
        Ok(())
    }
}

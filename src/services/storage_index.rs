//! src/services/storage_index.rs
//!
//! StorageIndex — the SQLite-backed metadata table mapping storage keys to
//! [`FileRecord`]s. The `UNIQUE` constraint on `storage_key` is the only
//! serialization point between concurrent uploads.

use crate::models::file_record::{FileRecord, NewFileRecord};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const RECORD_COLUMNS: &str = "id, storage_key, original_name, file_type, content_type, \
                              size_bytes, stored_path, created_at";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage key `{0}` is already indexed")]
    DuplicateKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Clone)]
pub struct StorageIndex {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl StorageIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> IndexResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Lightweight connectivity check used by the readiness check.
    pub async fn ping(&self) -> IndexResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        debug_assert_eq!(value, 1);
        Ok(())
    }

    /// Insert a record and return it with its assigned id.
    ///
    /// Returns DuplicateKey if the storage key is already present.
    pub async fn insert(&self, record: &NewFileRecord) -> IndexResult<FileRecord> {
        let sql = format!(
            "INSERT INTO files (
                storage_key, original_name, file_type, content_type,
                size_bytes, stored_path, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {RECORD_COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(&record.storage_key)
            .bind(&record.original_name)
            .bind(&record.file_type)
            .bind(&record.content_type)
            .bind(record.size_bytes)
            .bind(&record.stored_path)
            .bind(record.created_at)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    IndexError::DuplicateKey(record.storage_key.clone())
                } else {
                    IndexError::Sqlx(err)
                }
            })
    }

    pub async fn find_by_key(&self, key: &str) -> IndexResult<Option<FileRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files WHERE storage_key = ?");
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    pub async fn exists_by_key(&self, key: &str) -> IndexResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM files WHERE storage_key = ?)",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await?;
        Ok(exists)
    }

    /// All records in the order they were created.
    pub async fn list_all(&self) -> IndexResult<Vec<FileRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files ORDER BY created_at ASC, id ASC");
        let records = sqlx::query_as::<_, FileRecord>(&sql)
            .fetch_all(&*self.db)
            .await?;
        Ok(records)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

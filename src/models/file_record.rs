//! Represents a stored file and the metadata describing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Content type used when an upload declares none.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A single uploaded file.
///
/// The record describes the blob; the bytes themselves live on disk at
/// `stored_path`. Records are immutable once committed to the index.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Index primary key, assigned on insert.
    pub id: i64,

    /// Generated name the blob is stored under. Never client supplied.
    pub storage_key: String,

    /// Sanitized display name supplied by the client.
    pub original_name: String,

    /// Lower-cased extension taken from `original_name`.
    pub file_type: String,

    /// MIME type declared by the upload, or [`FALLBACK_CONTENT_TYPE`].
    pub content_type: String,

    /// Number of bytes written to disk.
    pub size_bytes: i64,

    /// Resolved blob location beneath the storage root.
    #[serde(skip_serializing, default)]
    pub stored_path: String,

    /// When the file was stored.
    pub created_at: DateTime<Utc>,
}

/// A record that has passed validation but has not been indexed yet.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub storage_key: String,
    pub original_name: String,
    pub file_type: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub stored_path: String,
    pub created_at: DateTime<Utc>,
}

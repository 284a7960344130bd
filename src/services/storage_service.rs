//! src/services/storage_service.rs
//!
//! StorageService — validates uploads, names them, and coordinates the
//! [`BlobStore`] (payload bytes on disk) with the [`StorageIndex`] (metadata in
//! SQLite).
//!
//! Writes always go blob first, index second. A crash between the two can
//! leave a blob with no record (an orphan, safe to sweep later); it can never
//! leave a record pointing at a missing blob.

use crate::{
    models::file_record::{FALLBACK_CONTENT_TYPE, FileRecord, NewFileRecord},
    services::{
        blob_store::{BlobError, BlobStore},
        storage_index::{IndexError, StorageIndex},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_ORIGINAL_NAME_LEN: usize = 255;

/// Extensions accepted when no other list is configured.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 18] = [
    "txt", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "jpg", "jpeg", "png", "gif", "svg",
    "json", "xml", "html", "css", "js",
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file name `{name}` is invalid: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("file type `{0}` is not allowed")]
    UnsupportedType(String),
    #[error("path `{}` escapes the storage root", .0.display())]
    PathEscape(PathBuf),
    #[error("could not store file: {0}")]
    StorageWrite(#[source] io::Error),
    /// The client's byte stream failed mid-upload. Nothing was stored.
    #[error("upload body could not be read: {0}")]
    UploadBody(#[source] io::Error),
    #[error("file `{0}` not found")]
    NotFound(String),
    /// The index has a record but its blob is gone.
    #[error("file `{key}` not found: blob missing at `{}`", path.display())]
    MissingBlob { key: String, path: PathBuf },
    #[error("storage key `{0}` already indexed")]
    DuplicateKey(String),
    #[error("storage root could not be prepared: {0}")]
    Initialization(String),
    #[error(transparent)]
    Index(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<IndexError> for StorageError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DuplicateKey(key) => StorageError::DuplicateKey(key),
            IndexError::Sqlx(err) => StorageError::Index(err),
        }
    }
}

/// Immutable set of accepted file extensions, compared lower-cased.
#[derive(Clone, Debug)]
pub struct AllowList(Arc<BTreeSet<String>>);

impl AllowList {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self(Arc::new(set))
    }

    pub fn contains(&self, extension: &str) -> bool {
        !extension.is_empty() && self.0.contains(&extension.to_ascii_lowercase())
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_EXTENSIONS)
    }
}

/// StorageService provides the file operations exposed over HTTP:
/// - Store a file (validate, write blob, index metadata)
/// - Fetch a file (look up metadata, read blob)
/// - Metadata only
/// - List everything
///
/// Cheap to clone; every clone shares the same pool and root.
#[derive(Clone)]
pub struct StorageService {
    pub index: StorageIndex,
    pub blobs: BlobStore,
    allowed: AllowList,
}

impl StorageService {
    pub fn new(index: StorageIndex, blobs: BlobStore, allowed: AllowList) -> Self {
        Self {
            index,
            blobs,
            allowed,
        }
    }

    /// Prepare the storage root and build a service over it.
    ///
    /// Fails with Initialization if the root cannot be created or written.
    pub async fn init(
        index: StorageIndex,
        root: impl Into<PathBuf>,
        allowed: AllowList,
    ) -> StorageResult<Self> {
        let blobs = BlobStore::ensure_root(root).await.map_err(|err| {
            error!("storage initialization failed: {}", err);
            StorageError::Initialization(err.to_string())
        })?;
        Ok(Self::new(index, blobs, allowed))
    }

    /// Store an upload.
    ///
    /// 1. Sanitizes the client name and derives the extension.
    /// 2. Checks the extension against the allow-list.
    /// 3. Generates `{uuid}.{ext}` and refuses it if already indexed.
    /// 4. Streams the bytes to `root/{key}` (fsynced).
    /// 5. Indexes the record.
    ///
    /// Validation failures return before anything touches disk. If indexing
    /// fails the fresh blob is removed best-effort.
    pub async fn store<S>(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        declared_size: Option<i64>,
        stream: S,
    ) -> StorageResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let display_name = sanitize_file_name(original_name).inspect_err(|err| {
            debug!("rejected upload name: {}", err);
        })?;
        let file_type = file_extension(&display_name);
        if !self.allowed.contains(&file_type) {
            debug!("rejected upload `{}`: type `{}` not allowed", display_name, file_type);
            return Err(StorageError::UnsupportedType(file_type));
        }

        let storage_key = format!("{}.{}", Uuid::new_v4(), file_type);
        // a write would clobber the indexed blob
        if self.index.exists_by_key(&storage_key).await? {
            error!("generated storage key `{}` is already indexed", storage_key);
            return Err(StorageError::DuplicateKey(storage_key));
        }
        let written = self
            .blobs
            .write_stream(&storage_key, stream)
            .await
            .map_err(|err| match err {
                BlobError::PathEscape(path) => {
                    error!("blob path escaped storage root: {}", path.display());
                    StorageError::PathEscape(path)
                }
                BlobError::Source(err) => {
                    debug!("upload body for `{}` failed: {}", display_name, err);
                    StorageError::UploadBody(err)
                }
                other => {
                    warn!("writing blob `{}` failed: {}", storage_key, other);
                    StorageError::StorageWrite(other.into_io())
                }
            })?;

        if let Some(declared) = declared_size {
            if declared != written.size_bytes {
                warn!(
                    "declared size {} for `{}` differs from {} bytes written",
                    declared, storage_key, written.size_bytes
                );
            }
        }

        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        let new_record = NewFileRecord {
            storage_key: storage_key.clone(),
            original_name: display_name,
            file_type,
            content_type,
            size_bytes: written.size_bytes,
            stored_path: written.path.to_string_lossy().into_owned(),
            created_at: Utc::now(),
        };

        match self.index.insert(&new_record).await {
            Ok(record) => {
                info!(
                    "stored `{}` as {} ({} bytes)",
                    record.original_name, record.storage_key, record.size_bytes
                );
                Ok(record)
            }
            Err(err) => {
                self.blobs.discard(&written.path).await;
                if let IndexError::DuplicateKey(key) = &err {
                    error!("generated storage key `{}` collided in the index", key);
                }
                Err(err.into())
            }
        }
    }

    /// Fetch a file's bytes together with its record.
    pub async fn fetch(&self, storage_key: &str) -> StorageResult<(Bytes, FileRecord)> {
        let record = self.metadata(storage_key).await?;
        let bytes = self
            .blobs
            .read(Path::new(&record.stored_path))
            .await
            .map_err(|err| self.blob_read_error(&record, err))?;
        Ok((bytes, record))
    }

    /// Look up a record without touching the blob.
    pub async fn metadata(&self, storage_key: &str) -> StorageResult<FileRecord> {
        match self.index.find_by_key(storage_key).await? {
            Some(record) => Ok(record),
            None => {
                debug!("no record for key `{}`", storage_key);
                Err(StorageError::NotFound(storage_key.to_string()))
            }
        }
    }

    pub async fn list_all(&self) -> StorageResult<Vec<FileRecord>> {
        Ok(self.index.list_all().await?)
    }

    fn blob_read_error(&self, record: &FileRecord, err: BlobError) -> StorageError {
        match err {
            BlobError::NotFound(path) => {
                error!(
                    "consistency violation: record `{}` has no blob at {}",
                    record.storage_key,
                    path.display()
                );
                StorageError::MissingBlob {
                    key: record.storage_key.clone(),
                    path,
                }
            }
            BlobError::PathEscape(path) => {
                error!(
                    "record `{}` points outside the storage root: {}",
                    record.storage_key,
                    path.display()
                );
                StorageError::PathEscape(path)
            }
            other => StorageError::Io(other.into_io()),
        }
    }
}

/// Reduce a client-supplied name to a safe display name.
///
/// - Backslashes count as separators.
/// - Empty and `.` segments are dropped; any `..` segment is rejected.
/// - The last remaining segment is the display name.
/// - Control characters and overly long names are rejected.
pub fn sanitize_file_name(raw: &str) -> StorageResult<String> {
    let invalid = |reason| StorageError::InvalidName {
        name: raw.to_string(),
        reason,
    };

    if raw.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if raw.chars().any(char::is_control) {
        return Err(invalid("name contains control characters"));
    }

    let normalized = raw.replace('\\', "/");
    if normalized.trim_end().ends_with('/') {
        return Err(invalid("name has no file component"));
    }
    let mut segments = Vec::new();
    for segment in normalized.split('/').map(str::trim) {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid("name contains a parent-directory segment")),
            other => segments.push(other),
        }
    }

    let name = segments
        .last()
        .ok_or_else(|| invalid("name has no file component"))?;
    if name.len() > MAX_ORIGINAL_NAME_LEN {
        return Err(invalid("name is too long"));
    }
    Ok(name.to_string())
}

/// Lower-cased text after the last `.`, or empty if there is none.
pub fn file_extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

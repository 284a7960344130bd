//! src/services/blob_store.rs
//!
//! BlobStore — flat on-disk payload storage beneath a single root directory.
//! Every blob lives at `root/{key}`; keys are generated by the caller and are
//! checked here so that no write or read can leave the root.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("path `{}` escapes the storage root", .0.display())]
    PathEscape(PathBuf),
    #[error("blob `{}` not found", .0.display())]
    NotFound(PathBuf),
    #[error("storage root `{}` is not usable: {source}", path.display())]
    Initialization {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The caller-supplied byte stream failed before it was fully consumed.
    #[error("reading upload body failed: {0}")]
    Source(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BlobError {
    /// Collapse into the underlying I/O error, keeping the message otherwise.
    pub fn into_io(self) -> io::Error {
        match self {
            BlobError::Io(err) | BlobError::Source(err) => err,
            BlobError::Initialization { source, .. } => source,
            other => io::Error::new(ErrorKind::Other, other.to_string()),
        }
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Outcome of a successful blob write.
#[derive(Debug, Clone)]
pub struct WrittenBlob {
    pub path: PathBuf,
    pub size_bytes: i64,
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create the storage root if needed and verify it accepts writes.
    ///
    /// Idempotent. The root is canonicalized so every later containment check
    /// compares against an absolute path.
    pub async fn ensure_root(root: impl Into<PathBuf>) -> BlobResult<Self> {
        let root = root.into();
        let init_err = |source| BlobError::Initialization {
            path: root.clone(),
            source,
        };

        fs::create_dir_all(&root).await.map_err(init_err)?;
        let canonical = fs::canonicalize(&root).await.map_err(init_err)?;
        if !fs::metadata(&canonical).await.map_err(init_err)?.is_dir() {
            return Err(init_err(io::Error::new(
                ErrorKind::Other,
                "path exists but is not a directory",
            )));
        }

        let store = Self { root: canonical };
        store
            .check_writable()
            .await
            .map_err(|err| init_err(err.into_io()))?;
        debug!("storage root ready at {}", store.root.display());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write, read back and remove a small marker blob under the root.
    ///
    /// Goes through the same write and read paths as real uploads.
    pub async fn check_writable(&self) -> BlobResult<()> {
        let key = format!(".check-{}", Uuid::new_v4());
        let written = self.write(&key, Bytes::from_static(b"check")).await?;
        let outcome = match self.read(&written.path).await {
            Ok(bytes) if &bytes[..] == b"check" => Ok(()),
            Ok(_) => Err(BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "readiness check content mismatch",
            ))),
            Err(err) => Err(err),
        };
        self.discard(&written.path).await;
        outcome
    }

    /// Join `key` onto the root and confirm the result is a direct child of it.
    ///
    /// Keys must be a single plain path segment; anything else (separators,
    /// `..`, absolute paths) is reported as an escape attempt.
    pub fn resolve(&self, key: &str) -> BlobResult<PathBuf> {
        let candidate = Path::new(key);
        let mut components = candidate.components();
        let single_segment = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        let path = self.root.join(candidate);
        if !single_segment || key.contains('\0') || path.parent() != Some(self.root.as_path()) {
            return Err(BlobError::PathEscape(path));
        }
        Ok(path)
    }

    /// Confirm an already resolved path still lies under the root.
    fn ensure_contained(&self, path: &Path) -> BlobResult<()> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
        if escapes || !path.starts_with(&self.root) || path == self.root {
            return Err(BlobError::PathEscape(path.to_path_buf()));
        }
        Ok(())
    }

    /// Stream bytes to `root/{key}`.
    ///
    /// - Writes incrementally to a temp file next to the destination.
    /// - Flushes and fsyncs before renaming into place, so the blob is durable
    ///   by the time this returns.
    /// - Replaces any existing blob at the same key.
    ///
    /// The temp file is removed on every error path.
    pub async fn write_stream<S>(&self, key: &str, stream: S) -> BlobResult<WrittenBlob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let file_path = self.resolve(key)?;
        let tmp_path = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BlobError::Source(err));
                }
            };
            size_bytes += chunk.len() as i64;
            if let Err(err) = file.write_all(&chunk).await {
                drop(file);
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BlobError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            drop(file);
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            drop(file);
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        drop(file);

        if let Err(err) = self.rename_into_place(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        // the rename is only durable once the directory entry is on disk
        if let Err(err) = sync_dir(&self.root).await {
            let _ = fs::remove_file(&file_path).await;
            return Err(BlobError::Io(err));
        }

        debug!("wrote {} bytes to {}", size_bytes, file_path.display());
        Ok(WrittenBlob {
            path: file_path,
            size_bytes,
        })
    }

    async fn rename_into_place(&self, tmp_path: &Path, file_path: &Path) -> io::Result<()> {
        match fs::rename(tmp_path, file_path).await {
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                fs::remove_file(file_path).await?;
                fs::rename(tmp_path, file_path).await
            }
            other => other,
        }
    }

    /// Write an in-memory buffer to `root/{key}`.
    pub async fn write(&self, key: &str, bytes: Bytes) -> BlobResult<WrittenBlob> {
        self.write_stream(key, futures::stream::once(async move { Ok(bytes) }))
            .await
    }

    /// Read a stored blob fully into memory.
    pub async fn read(&self, stored_path: &Path) -> BlobResult<Bytes> {
        self.ensure_contained(stored_path)?;
        fs::read(stored_path)
            .await
            .map(Bytes::from)
            .map_err(|err| not_found_or_io(err, stored_path))
    }

    /// Best-effort removal, used to undo a write whose index commit failed.
    pub async fn discard(&self, stored_path: &Path) {
        if self.ensure_contained(stored_path).is_err() {
            return;
        }
        match fs::remove_file(stored_path).await {
            Ok(_) => debug!("discarded blob {}", stored_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!("failed to discard {}: {}", stored_path.display(), err),
        }
    }
}

async fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir).await?.sync_all().await
}

fn not_found_or_io(err: io::Error, path: &Path) -> BlobError {
    if err.kind() == ErrorKind::NotFound {
        BlobError::NotFound(path.to_path_buf())
    } else {
        BlobError::Io(err)
    }
}

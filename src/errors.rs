use crate::services::storage_service::StorageError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use std::fmt;

const PAYLOAD_TOO_LARGE_MESSAGE: &str = "File size exceeds maximum limit!";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16(),
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        multipart_error(&err)
    }
}

/// Missing records and missing blobs look the same to clients; internal
/// failures never echo paths or driver messages.
impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName { .. } => AppError::bad_request(err.to_string()),
            StorageError::UnsupportedType(_) => {
                AppError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string())
            }
            StorageError::NotFound(key) | StorageError::MissingBlob { key, .. } => {
                AppError::not_found(format!("File not found: {}", key))
            }
            StorageError::UploadBody(io_err) => match io_err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<MultipartError>())
            {
                Some(multipart) => multipart_error(multipart),
                None => AppError::bad_request(format!("upload body could not be read: {}", io_err)),
            },
            StorageError::PathEscape(_)
            | StorageError::StorageWrite(_)
            | StorageError::DuplicateKey(_)
            | StorageError::Initialization(_)
            | StorageError::Index(_)
            | StorageError::Io(_) => {
                tracing::error!("storage failure: {}", err);
                AppError::internal("Could not process file")
            }
        }
    }
}

fn multipart_error(err: &MultipartError) -> AppError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(status, PAYLOAD_TOO_LARGE_MESSAGE)
    } else {
        AppError::new(status, err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io, path::PathBuf};

    #[test]
    fn validation_errors_are_client_errors() {
        let invalid = AppError::from(StorageError::InvalidName {
            name: "../x".into(),
            reason: "name contains a parent-directory segment",
        });
        let unsupported = AppError::from(StorageError::UnsupportedType("exe".into()));

        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(unsupported.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(unsupported.message.contains("exe"));
    }

    #[test]
    fn missing_record_and_missing_blob_share_a_response() {
        let missing = AppError::from(StorageError::NotFound("k.txt".into()));
        let lost = AppError::from(StorageError::MissingBlob {
            key: "k.txt".into(),
            path: PathBuf::from("/srv/uploads/k.txt"),
        });

        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(lost.status, missing.status);
        assert_eq!(lost.message, missing.message);
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = AppError::from(StorageError::PathEscape(PathBuf::from("/etc/passwd")));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("passwd"));

        let err = AppError::from(StorageError::StorageWrite(io::Error::new(
            io::ErrorKind::Other,
            "disk full at /srv",
        )));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("/srv"));
    }

    #[test]
    fn plain_upload_body_failure_is_bad_request() {
        let err = AppError::from(StorageError::UploadBody(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated",
        )));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}

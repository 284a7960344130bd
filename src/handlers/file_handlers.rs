//! HTTP handlers for file upload, listing, download and metadata.
//! Uploads are streamed to disk; downloads are bounded by the upload limit
//! and served from memory. Storage concerns live in `StorageService`.

use crate::{
    errors::AppError,
    models::file_record::{FALLBACK_CONTENT_TYPE, FileRecord},
    services::storage_service::StorageService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::io;

/// Name of the multipart field carrying the upload.
const UPLOAD_FIELD: &str = "file";
const DOWNLOAD_PATH: &str = "/api/files/download/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_name: String,
    pub file_id: i64,
    pub storage_key: String,
    pub file_download_uri: String,
    pub file_type: String,
    pub content_type: String,
    pub size: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: i64,
    pub upload_date: DateTime<Utc>,
    pub download_url: String,
}

/// POST `/api/files/upload` — multipart upload, file in the `file` field.
pub async fn upload_file(
    State(service): State<StorageService>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let stream = field.map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

        let record = service
            .store(&file_name, content_type.as_deref(), None, stream)
            .await?;

        return Ok(Json(UploadResponse {
            file_download_uri: download_uri(&headers, &record.storage_key),
            file_name: record.original_name,
            file_id: record.id,
            storage_key: record.storage_key,
            file_type: record.file_type,
            content_type: record.content_type,
            size: record.size_bytes,
        }));
    }

    Err(AppError::bad_request(format!(
        "multipart field `{}` is required",
        UPLOAD_FIELD
    )))
}

/// GET `/api/files/list` — every stored file, oldest first.
pub async fn list_files(
    State(service): State<StorageService>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileSummary>>, AppError> {
    let records = service.list_all().await?;
    let summaries = records
        .into_iter()
        .map(|record| FileSummary {
            download_url: download_uri(&headers, &record.storage_key),
            id: record.id,
            name: record.original_name,
            file_type: record.file_type,
            size: record.size_bytes,
            upload_date: record.created_at,
        })
        .collect();
    Ok(Json(summaries))
}

/// GET `/api/files/download/{key}` — the stored bytes as an attachment.
pub async fn download_file(
    State(service): State<StorageService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (bytes, record) = service.fetch(&key).await?;

    let length = bytes.len() as u64;
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &record, length);
    Ok(response)
}

/// GET `/api/files/{key}` — metadata only.
pub async fn file_metadata(
    State(service): State<StorageService>,
    Path(key): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(service.metadata(&key).await?))
}

fn set_download_headers(headers: &mut HeaderMap, record: &FileRecord, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE)),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(length),
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        quoted_filename(&record.original_name)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
}

/// Absolute download URI when the request names its host, else root-relative.
fn download_uri(headers: &HeaderMap, key: &str) -> String {
    match headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => format!("http://{}{}{}", host, DOWNLOAD_PATH, key),
        None => format!("{}{}", DOWNLOAD_PATH, key),
    }
}

/// Make a display name safe inside a quoted `filename=` parameter.
fn quoted_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect()
}

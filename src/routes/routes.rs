//! Defines routes for file operations.
//!
//! ## Structure
//! - `POST /api/files/upload`         — multipart upload (field `file`)
//! - `GET  /api/files/list`           — list every stored file
//! - `GET  /api/files/download/{key}` — download bytes as an attachment
//! - `GET  /api/files/{key}`          — metadata only
//! - `GET  /healthz`, `GET /readyz`   — health checks

use crate::{
    handlers::{
        file_handlers::{download_file, file_metadata, list_files, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::storage_service::StorageService,
};
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

/// Build the router for all file routes.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/files/upload", post(upload_file))
        .route("/api/files/list", get(list_files))
        .route("/api/files/download/{key}", get(download_file))
        .route("/api/files/{key}", get(file_metadata))
}

/// Attach state, the request body limit and CORS.
pub fn app(service: StorageService, max_upload_bytes: usize, cors: CorsLayer) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(service)
}

/// CORS policy allowing a single browser origin.
pub fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin)
        .with_context(|| format!("invalid CORS origin `{}`", origin))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        storage_index::tests::open_index,
        storage_service::AllowList,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XBOUNDARYX";

    async fn test_app(temp: &TempDir, max_upload_bytes: usize) -> Router {
        let index = open_index(temp).await;
        let service =
            StorageService::init(index, temp.path().join("uploads"), AllowList::default())
                .await
                .unwrap();
        app(
            service,
            max_upload_bytes,
            cors_layer("http://localhost:3000").unwrap(),
        )
    }

    fn multipart_upload(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/files/upload")
            .header("host", "files.test")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_and_metadata() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp, 1024 * 1024).await;

        let response = app
            .clone()
            .oneshot(multipart_upload("file", "report.PDF", "application/pdf", &[0xAB; 1024]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let uploaded = json_body(response).await;
        assert_eq!(uploaded["fileName"], "report.PDF");
        assert_eq!(uploaded["fileType"], "pdf");
        assert_eq!(uploaded["size"], 1024);
        let key = uploaded["storageKey"].as_str().unwrap().to_string();
        assert_eq!(
            uploaded["fileDownloadUri"],
            format!("http://files.test/api/files/download/{key}")
        );

        let response = app
            .clone()
            .oneshot(get(&format!("/api/files/download/{key}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.PDF\""
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes.iter().all(|b| *b == 0xAB));

        let response = app
            .oneshot(get(&format!("/api/files/{key}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let meta = json_body(response).await;
        assert_eq!(meta["storageKey"], key.as_str());
        assert_eq!(meta["contentType"], "application/pdf");
        assert!(meta.get("storedPath").is_none());
    }

    #[tokio::test]
    async fn list_reports_every_upload() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp, 1024 * 1024).await;

        for name in ["a.txt", "a.txt", "b.png"] {
            let response = app
                .clone()
                .oneshot(multipart_upload("file", name, "text/plain", b"data"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(get("/api/files/list")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = json_body(response).await;
        let items = listed.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["name"], "a.txt");
        assert_eq!(items[2]["type"], "png");
        assert_ne!(items[0]["downloadUrl"], items[1]["downloadUrl"]);
    }

    #[tokio::test]
    async fn rejected_uploads_map_to_client_errors() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp, 1024 * 1024).await;

        let response = app
            .clone()
            .oneshot(multipart_upload("file", "payload.exe", "application/octet-stream", b"MZ"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = app
            .clone()
            .oneshot(multipart_upload("file", "../../etc/passwd.txt", "text/plain", b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(multipart_upload("other", "a.txt", "text/plain", b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get("/api/files/list")).await.unwrap();
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_payload_too_large() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp, 256).await;

        let response = app
            .clone()
            .oneshot(multipart_upload("file", "big.txt", "text/plain", &[b'a'; 4096]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = app.oneshot(get("/api/files/list")).await.unwrap();
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp, 1024).await;

        let response = app
            .clone()
            .oneshot(get("/api/files/download/missing.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get("/api/files/missing.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "File not found: missing.txt");
    }

    #[tokio::test]
    async fn health_checks_report_ok() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp, 1024).await;

        let response = app.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["checks"]["index"]["ok"], true);
        assert_eq!(body["checks"]["disk"]["ok"], true);
    }
}

//! Defines routes for resumable uploads and stored files.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /upload`: send one chunk (multipart form)
//!   - `GET  /upload`: ask whether a chunk is stored (query string)
//!
//! - **File endpoints**
//!   - `GET /files/{*name}`: download a collected file
//!
//! The wildcard `*name` allows nested names like `uploads/2025/06/video.mp4`.

use crate::{
    handlers::{
        file_handlers::get_file,
        health_handlers::{healthz, readyz},
        upload_handlers::{check_chunk, upload_chunk},
    },
    services::upload_service::UploadService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Room for the multipart framing and text fields around a chunk.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router; requests larger than `max_chunk_bytes` plus multipart
/// overhead are rejected with 413.
pub fn routes(max_chunk_bytes: usize) -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            get(check_chunk)
                .post(upload_chunk)
                .layer(DefaultBodyLimit::max(
                    max_chunk_bytes.saturating_add(MULTIPART_OVERHEAD),
                )),
        )
        .route("/files/{*name}", get(get_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::upload_handlers::USER_HEADER, services::upload_service::tests::service,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use tower::ServiceExt;

    const BOUNDARY: &str = "chunk-boundary-7MA4YWxkTrZu0gW";

    fn multipart_body(fields: &[(&str, &str)], data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn post_chunk(chunk: u32, total: u32, data: &[u8]) -> Request<Body> {
        let chunk = chunk.to_string();
        let total = total.to_string();
        let fields = [
            ("resumableIdentifier", "123-report"),
            ("resumableFilename", "report.csv"),
            ("resumableChunkNumber", chunk.as_str()),
            ("resumableTotalChunks", total.as_str()),
        ];
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(USER_HEADER, "7")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(&fields, data)))
            .unwrap()
    }

    fn get_chunk(chunk: u32, total: u32) -> Request<Body> {
        Request::builder()
            .uri(format!(
                "/upload?resumableIdentifier=123-report&resumableFilename=report.csv\
                 &resumableChunkNumber={}&resumableTotalChunks={}",
                chunk, total
            ))
            .header(USER_HEADER, "7")
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn full_upload_over_http() {
        let (_dir, _chunks, service) = service().await;
        let app = routes(1024).with_state(service);

        let (status, _) = send(&app, get_chunk(1, 3)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, post_chunk(2, 3, b"B")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"chunk uploaded");

        let (status, body) = send(&app, post_chunk(1, 3, b"A")).await;
        assert_eq!((status, body.as_slice()), (StatusCode::OK, &b"chunk uploaded"[..]));

        // resend of an acknowledged chunk is accepted
        let (status, body) = send(&app, post_chunk(1, 3, b"A")).await;
        assert_eq!((status, body.as_slice()), (StatusCode::OK, &b"chunk uploaded"[..]));

        let (status, body) = send(&app, get_chunk(1, 3)).await;
        assert_eq!((status, body.as_slice()), (StatusCode::OK, &b"chunk exists"[..]));

        let (status, body) = send(&app, post_chunk(3, 3, b"C")).await;
        assert_eq!(status, StatusCode::OK);
        let name = String::from_utf8(body).unwrap();
        assert_eq!(name, "uploads/report.csv");

        let (status, body) = send(
            &app,
            Request::builder()
                .uri(format!("/files/{}", name))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ABC");

        // chunks are gone after collection
        let (status, _) = send(&app, get_chunk(3, 3)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn invalid_parameters_are_bad_requests() {
        let (_dir, _chunks, service) = service().await;
        let app = routes(1024).with_state(service);

        let (status, body) = send(&app, get_chunk(4, 3)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 400);

        let req = Request::builder()
            .uri("/upload?resumableIdentifier=x")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_chunks_are_rejected() {
        let (_dir, _chunks, service) = service().await;
        let app = routes(16).with_state(service);
        let data = vec![0u8; MULTIPART_OVERHEAD + 1024];
        let (status, _) = send(&app, post_chunk(1, 1, &data)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let (_dir, _chunks, service) = service().await;
        let app = routes(1024).with_state(service);
        let req = Request::builder()
            .uri("/files/uploads/nothing.bin")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_endpoints() {
        let (_dir, _chunks, service) = service().await;
        let app = routes(1024).with_state(service);

        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);

        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["checks"]["chunk_storage"]["backend"], "memory");
    }
}

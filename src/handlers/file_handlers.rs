//! Download of collected files. Bodies are streamed, never buffered.

use crate::{errors::AppError, models::stored_file::StoredFile, services::upload_service::UploadService};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};

/// `GET /files/{*name}`: stream a stored file.
pub async fn get_file(
    State(service): State<UploadService>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let (meta, stream) = service.persistent_storage().open(&name).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_file_headers(headers: &mut HeaderMap, meta: &StoredFile) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let filename = meta.name.rsplit('/').next().unwrap_or(&meta.name);
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename.replace('"', "")))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

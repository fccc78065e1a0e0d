//! HTTP handlers for resumable chunk uploads.
//!
//! Parameters follow resumable.js: `POST /upload` carries one chunk as a
//! multipart form (parameters as text fields, bytes in `file`), `GET /upload`
//! carries the same parameters in the query string and asks whether a chunk
//! is already stored. All decisions are delegated to `UploadService`.

use crate::{
    errors::AppError,
    models::upload::UploadParams,
    services::{
        UploadError,
        upload_service::{ChunkOutcome, DEFAULT_DESTINATION, UploadService},
    },
};
use axum::{
    extract::{Multipart, Query, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

/// Header set by the upstream auth layer with the requesting user's id.
pub const USER_HEADER: &str = "x-user-id";
const ANONYMOUS_USER: &str = "anonymous";
/// Multipart part carrying the chunk bytes.
const FILE_FIELD: &str = "file";

/// `POST /upload`: store one chunk and collect the file once complete.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut fields = HashMap::new();
    let mut data: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FILE_FIELD {
            data = Some(field.bytes().await.map_err(multipart_error)?);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
        }
    }

    let data = data.ok_or_else(|| AppError::bad_request("missing `file` part"))?;
    let params = UploadParams::from_map(&fields).map_err(UploadError::from)?;
    let user = requesting_user(&headers);
    let destination = destination_field(&fields);
    debug!(
        "chunk {}/{} of {} from {} ({} bytes)",
        params.chunk_number,
        params.total_chunks,
        params.filename,
        user,
        data.len()
    );

    let outcome = service
        .upload_chunk(&user, &destination, params, data)
        .await?;
    Ok(outcome_response(outcome))
}

/// `GET /upload`: does the chunk exist? Collects if the upload is complete.
pub async fn check_chunk(
    State(service): State<UploadService>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let params = UploadParams::from_map(&query).map_err(UploadError::from)?;
    let user = requesting_user(&headers);
    let destination = destination_field(&query);

    let outcome = service.check_chunk(&user, &destination, params).await?;
    Ok(outcome_response(outcome))
}

fn outcome_response(outcome: ChunkOutcome) -> Response {
    match outcome {
        ChunkOutcome::Uploaded => (StatusCode::OK, "chunk uploaded").into_response(),
        ChunkOutcome::Exists => (StatusCode::OK, "chunk exists").into_response(),
        ChunkOutcome::Missing => (StatusCode::NO_CONTENT, "chunk not found").into_response(),
        ChunkOutcome::Collected(stored) => (StatusCode::OK, stored.name).into_response(),
    }
}

fn requesting_user(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

fn destination_field(fields: &HashMap<String, String>) -> String {
    ["field", "field_name"]
        .iter()
        .find_map(|name| fields.get(*name))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_DESTINATION)
        .to_string()
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

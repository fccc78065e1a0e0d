//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that probes chunk and persistent storage

use crate::{services::upload_service::UploadService, storage::StorageResult};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe, always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs the health check of both storage backends (the persistent one
/// includes its SQLite metadata). HTTP 200 when all checks pass, HTTP 503
/// when any check fails.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let chunks = service.chunk_storage();
    let persistent = service.persistent_storage();

    let mut checks = HashMap::new();
    checks.insert(
        "chunk_storage",
        check_status(chunks.backend_name(), chunks.health_check().await),
    );
    checks.insert(
        "persistent_storage",
        check_status(persistent.backend_name(), persistent.health_check().await),
    );

    let overall_ok = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

fn check_status(backend: &'static str, result: StorageResult<()>) -> CheckStatus {
    match result {
        Ok(()) => CheckStatus {
            ok: true,
            backend,
            error: None,
        },
        Err(e) => CheckStatus {
            ok: false,
            backend,
            error: Some(e.to_string()),
        },
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    backend: &'static str,
    error: Option<String>,
}

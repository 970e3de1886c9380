//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and storage I/O

use crate::services::review_service::ReviewService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

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
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `GET /healthz`
///
/// Liveness probe — always 200 OK, never performs I/O.
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
/// Readiness probe: a `SELECT 1` against SQLite plus a best-effort
/// write/read/delete under the storage root. 200 when both pass, 503
/// otherwise.
pub async fn readyz(State(service): State<ReviewService>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => CheckStatus {
            ok: true,
            error: None,
        },
        Ok(v) => CheckStatus {
            ok: false,
            error: Some(format!("unexpected result: {}", v)),
        },
        Err(e) => CheckStatus {
            ok: false,
            error: Some(format!("error: {}", e)),
        },
    };

    let storage_check = match storage_roundtrip(&service).await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(e) => CheckStatus {
            ok: false,
            error: Some(e),
        },
    };

    let overall_ok = sqlite_check.ok && storage_check.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("storage", storage_check);

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if overall_ok { "ok" } else { "error" }.into(),
            checks,
        }),
    )
}

async fn storage_roundtrip(service: &ReviewService) -> Result<(), String> {
    let tmp_path = service.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&tmp_path, b"readyz")
        .await
        .map_err(|e| format!("could not write tmp file: {}", e))?;
    let bytes = fs::read(&tmp_path).await.map_err(|e| {
        format!("could not read tmp file: {}", e)
    });
    let _ = fs::remove_file(&tmp_path).await;
    match bytes {
        Ok(bytes) if bytes == b"readyz" => Ok(()),
        Ok(_) => Err("file content mismatch".into()),
        Err(e) => Err(e),
    }
}

//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks disk I/O in the save and scratch roots

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe: always returns 200 OK with a plain JSON body.
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
/// Performs a write/read/delete round trip in `save_dir` (per-user mirrors)
/// and in `temp_dir` (scratch directories). HTTP 200 when both pass, 503
/// when either fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let save_check = disk_check(&state.config.save_dir).await;
    let temp_check = disk_check(&state.config.temp_dir).await;
    let overall_ok = save_check.ok && temp_check.ok;

    let mut checks = HashMap::new();
    checks.insert("save_dir", save_check);
    checks.insert("temp_dir", temp_check);

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

/// Write, read back and remove a probe file under `dir`.
async fn disk_check(dir: &Path) -> CheckStatus {
    let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => Ok(()),
                Err(e) => Err(format!("could not remove tmp file: {}", e)),
            },
            Ok(_) => Err("file content mismatch".to_string()),
            Err(e) => Err(format!("could not read tmp file: {}", e)),
        },
        Err(e) => Err(format!("could not write tmp file: {}", e)),
    };
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await; // best-effort cleanup
    }

    CheckStatus {
        ok: result.is_ok(),
        error: result.err(),
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
    error: Option<String>,
}

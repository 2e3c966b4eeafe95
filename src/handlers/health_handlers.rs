//! Health & readiness handlers.
//!
//! - GET /health  -> liveness (`{"status":"healthy"}`)
//! - GET /readyz  -> readiness of the metadata database and the storage root

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

use crate::state::AppState;

/// `GET /health`
///
/// Always 200 and never performs I/O.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when the database answers `SELECT 1` and a scratch file can be
/// written, read back and removed under the storage root, 503 otherwise.
/// The body also reports how many multipart sessions are open.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", check_sqlite(&state.db).await);
    checks.insert("disk", check_disk(&state.storage_dir).await);

    let ready = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" }.into(),
        checks,
        active_uploads: state.uploads.active_sessions(),
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_sqlite(db: &SqlitePool) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => CheckStatus::passed(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    }
}

async fn check_disk(root: &Path) -> CheckStatus {
    const PROBE: &[u8] = b"readyz";
    let probe_path = root.join(format!(".readyz-{}", Uuid::new_v4()));

    if let Err(e) = fs::write(&probe_path, PROBE).await {
        return CheckStatus::failed(format!("could not write probe file: {}", e));
    }
    let read_back = fs::read(&probe_path).await;
    let removed = fs::remove_file(&probe_path).await;

    match read_back {
        Ok(bytes) if bytes == PROBE => match removed {
            Ok(()) => CheckStatus::passed(),
            // Readable storage is still usable; report the leftover.
            Err(e) => CheckStatus {
                ok: true,
                error: Some(format!("could not remove probe file: {}", e)),
            },
        },
        Ok(_) => CheckStatus::failed("probe file content mismatch".to_string()),
        Err(e) => CheckStatus::failed(format!("could not read probe file: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
    active_uploads: usize,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn passed() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

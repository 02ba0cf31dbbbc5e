//! The Submission API's three operations: `submit`, `get`, `health`.
//! Validation here is total and purely local — no container interaction
//! ever happens on this path.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use judge_common::types::{JobOverrides, LanguageId, NewJob};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;

/// A submission override is rejected outside this window.
const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 60_000;
const MIN_MEMORY_LIMIT_MIB: u64 = 16;
const MAX_MEMORY_LIMIT_MIB: u64 = 2_048;
const MIN_CPU_QUOTA: f64 = 0.1;
const MAX_CPU_QUOTA: f64 = 4.0;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub language: String,
    #[serde(default)]
    pub source_code: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub memory_limit_mib: Option<u64>,
    #[serde(default)]
    pub cpu_quota: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
        }
    }

    fn with_detail(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: Some(detail.into()),
        }
    }
}

/// `POST /submissions`: validate the request against the Language Registry
/// and the bounds above, then insert a `pending` record. Returns as soon
/// as the record is durably persisted — never blocks on execution.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    let language_id = match LanguageId::from_str_opt(&payload.language) {
        Some(id) if state.registry.contains(id) => id,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::with_detail(
                    "validation_error",
                    format!("unknown language '{}'", payload.language),
                )),
            )
                .into_response();
        }
    };

    let source_code = match &payload.source_code {
        Some(source) if !source.is_empty() => source.clone(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("source_code must not be absent or empty")),
            )
                .into_response();
        }
    };
    if source_code.len() > state.config.max_source_bytes {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("source_code exceeds the maximum allowed size")),
        )
            .into_response();
    }

    let stdin = payload.stdin.clone().unwrap_or_default().into_bytes();
    if stdin.len() > state.config.max_stdin_bytes {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("stdin exceeds the maximum allowed size")),
        )
            .into_response();
    }

    if let Err(detail) = validate_overrides(&payload) {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse::with_detail("validation_error", detail)))
            .into_response();
    }

    let job = NewJob {
        language_id,
        source_code: source_code.into_bytes(),
        stdin,
        overrides: JobOverrides {
            timeout_ms: payload.timeout_ms,
            memory_limit_mib: payload.memory_limit_mib,
            cpu_quota: payload.cpu_quota,
        },
    };

    match state.store.create(job).await {
        Ok(job_id) => {
            info!(%job_id, %language_id, "job submitted");
            (
                StatusCode::CREATED,
                Json(SubmitResponse {
                    job_id,
                    status: "pending",
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "failed to persist submission");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_detail("internal_error", e.to_string())),
            )
                .into_response()
        }
    }
}

fn validate_overrides(payload: &SubmitRequest) -> Result<(), String> {
    if let Some(timeout_ms) = payload.timeout_ms {
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(format!(
                "timeout_ms must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS}"
            ));
        }
    }
    if let Some(memory_limit_mib) = payload.memory_limit_mib {
        if !(MIN_MEMORY_LIMIT_MIB..=MAX_MEMORY_LIMIT_MIB).contains(&memory_limit_mib) {
            return Err(format!(
                "memory_limit_mib must be between {MIN_MEMORY_LIMIT_MIB} and {MAX_MEMORY_LIMIT_MIB}"
            ));
        }
    }
    if let Some(cpu_quota) = payload.cpu_quota {
        if !(MIN_CPU_QUOTA..=MAX_CPU_QUOTA).contains(&cpu_quota) {
            return Err(format!("cpu_quota must be between {MIN_CPU_QUOTA} and {MAX_CPU_QUOTA}"));
        }
    }
    Ok(())
}

/// `GET /submissions/{id}`: return the full record, or 404.
pub async fn get_submission(State(state): State<Arc<AppState>>, Path(job_id): Path<Uuid>) -> impl IntoResponse {
    match state.store.fetch(job_id).await {
        // `JobRecord`'s `Serialize` impl already redacts `source_code`/`stdin`.
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(ErrorResponse::new("job not found"))).into_response(),
        Err(e) => {
            warn!(%job_id, error = %e, "failed to fetch job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_detail("internal_error", e.to_string())),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub workers: usize,
    pub pending: i64,
    pub running: i64,
}

/// `GET /health`: a liveness probe for load balancers and orchestrators.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.health_counts().await {
        Ok(counts) => (
            StatusCode::OK,
            Json(HealthResponse {
                ok: true,
                workers: state.worker_count,
                pending: counts.pending,
                running: counts.running,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "health check could not reach the job store");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse {
                    ok: false,
                    workers: state.worker_count,
                    pending: 0,
                    running: 0,
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_override_within_bounds_is_accepted() {
        let payload = SubmitRequest {
            language: "python3".to_string(),
            source_code: Some("print(1)".to_string()),
            stdin: None,
            timeout_ms: Some(2_000),
            memory_limit_mib: None,
            cpu_quota: None,
        };
        assert!(validate_overrides(&payload).is_ok());
    }

    #[test]
    fn timeout_override_below_minimum_is_rejected() {
        let payload = SubmitRequest {
            language: "python3".to_string(),
            source_code: Some("print(1)".to_string()),
            stdin: None,
            timeout_ms: Some(1),
            memory_limit_mib: None,
            cpu_quota: None,
        };
        assert!(validate_overrides(&payload).is_err());
    }

    #[test]
    fn cpu_quota_above_maximum_is_rejected() {
        let payload = SubmitRequest {
            language: "python3".to_string(),
            source_code: Some("print(1)".to_string()),
            stdin: None,
            timeout_ms: None,
            memory_limit_mib: None,
            cpu_quota: Some(100.0),
        };
        assert!(validate_overrides(&payload).is_err());
    }
}

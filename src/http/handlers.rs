//! Handlers for the standalone admission service.
//!
//! Lets the gate run out-of-process: a proxy or sidecar posts the caller key
//! to `/check` before forwarding a request, reports out-of-band failures to
//! `/failure`, and clears state through `/reset` after a successful sensitive
//! operation.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::middleware::block_hint;
use crate::ratelimit::RateLimiter;

/// Shared application state.
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
}

/// Admission check request.
#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

/// Admission check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    pub remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Key status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub key: String,
    pub remaining: u32,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Build the admission service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/check", post(check))
        .route("/failure", post(report_failure))
        .route("/reset", post(reset))
        .route("/status/:key", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "gatehouse",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run a key through the gate, counting the attempt.
///
/// Always returns 200 with `allowed` in the body so a calling proxy can read
/// the verdict; turning a denial into a 429 toward the end client is the
/// caller's job.
async fn check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeyRequest>,
) -> Json<CheckResponse> {
    let allowed = state.limiter.allow(&req.key);
    debug!(key = %req.key, allowed, "Admission check");

    let hint = if allowed {
        None
    } else {
        block_hint(&state.limiter, &req.key)
    };

    Json(CheckResponse {
        allowed,
        remaining: state.limiter.remaining_attempts(&req.key),
        blocked_until: hint.map(|(_, until)| until),
        retry_after: hint.map(|(secs, _)| secs),
    })
}

/// Penalize a key for a failure observed after admission.
async fn report_failure(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeyRequest>,
) -> impl IntoResponse {
    state.limiter.record_failure(&req.key);
    debug!(key = %req.key, "Recorded failure");
    StatusCode::NO_CONTENT
}

/// Clear all accumulated state for a key.
async fn reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeyRequest>,
) -> impl IntoResponse {
    state.limiter.reset(&req.key);
    debug!(key = %req.key, "Reset key");
    StatusCode::NO_CONTENT
}

/// Read-only view of a key's standing. Does not count an attempt.
async fn status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Json<StatusResponse> {
    let hint = block_hint(&state.limiter, &key);
    Json(StatusResponse {
        remaining: state.limiter.remaining_attempts(&key),
        blocked: hint.is_some(),
        blocked_until: hint.map(|(_, until)| until),
        key,
    })
}

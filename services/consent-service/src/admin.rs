//! Admin API for the provider key pool
//!
//! Runs on a separate listener (default 127.0.0.1:9090) and is never exposed
//! publicly.
//!
//! Endpoints:
//! - GET  /admin/keys         per-key usage for the current month (no secrets)
//! - GET  /admin/keys/status  the key the next request would use
//! - POST /admin/keys/seed    add provider keys, skipping ids that already exist

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use key_pool::KeyPool;
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<KeyPool>,
}

impl AdminState {
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool }
    }
}

/// Build the admin router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/keys", get(list_keys))
        .route("/admin/keys/status", get(key_status))
        .route("/admin/keys/seed", post(seed_keys))
        .with_state(state)
}

/// GET /admin/keys: per-key usage report for the current period.
async fn list_keys(State(state): State<AdminState>) -> Result<Response, ApiError> {
    let period = state.pool.current_period();
    let report = state.pool.report(&period).await?;
    Ok((StatusCode::OK, axum::Json(report)).into_response())
}

/// GET /admin/keys/status: best candidate for the current period.
async fn key_status(State(state): State<AdminState>) -> impl IntoResponse {
    let period = state.pool.current_period();
    let status = state.pool.status(&period).await;
    let mut body = serde_json::to_value(&status).unwrap_or_default();
    body["period"] = serde_json::Value::String(period.to_string());
    (StatusCode::OK, axum::Json(body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedRequest {
    api_keys: Vec<Secret<String>>,
}

/// POST /admin/keys/seed: idempotent seeding of `key_1..key_n`.
async fn seed_keys(
    State(state): State<AdminState>,
    body: Result<axum::Json<SeedRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let axum::Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if body.api_keys.iter().all(|k| k.is_blank()) {
        return Err(ApiError::BadRequest(
            "apiKeys must contain at least one key".into(),
        ));
    }

    let report = state.pool.seed(&body.api_keys).await?;
    info!(
        created = report.created.len(),
        skipped = report.skipped.len(),
        "keys seeded via admin API"
    );
    Ok((StatusCode::OK, axum::Json(report)).into_response())
}

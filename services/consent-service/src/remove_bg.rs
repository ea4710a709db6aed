//! `POST /api/remove-bg`
//!
//! Accepts the signature as a data URL and returns it with the background
//! removed. Every removal failure is answered with `fallback: true` so the page
//! keeps the unprocessed signature and the form still gets generated.

use std::time::Instant;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use removebg::{FailureReason, RemovalClient, RemovalOutcome, parse_data_url, to_data_url};

use crate::error::ApiError;

/// Request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBgRequest {
    pub image_base64: String,
}

/// HTTP status for a failed removal. Only a rejected image is the caller's
/// fault; everything else is the service being unable to help right now.
fn failure_status(reason: &FailureReason) -> StatusCode {
    match reason {
        FailureReason::ImageRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Run one removal request against the key pool.
pub async fn remove_background(
    client: &RemovalClient,
    request: RemoveBgRequest,
) -> Result<Response, ApiError> {
    let image = parse_data_url(&request.image_base64)
        .map_err(|e| ApiError::BadRequest(format!("imageBase64: {e}")))?;

    let started = Instant::now();
    let outcome = client.remove_background(image.bytes).await;
    crate::metrics::record_removal(outcome.label(), started.elapsed().as_secs_f64());

    let response = match outcome {
        RemovalOutcome::Done(processed) => {
            info!(key_id = %processed.key_id, attempts = processed.attempts, "signature background removed");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "image": to_data_url(processed.mime, &processed.bytes),
                    "keyId": processed.key_id,
                    "attempts": processed.attempts,
                })),
            )
                .into_response()
        }
        RemovalOutcome::Failed(reason) => {
            if reason.is_configuration() {
                warn!(reason = reason.code(), "background removal unavailable, operator action needed");
            }
            (
                failure_status(&reason),
                Json(serde_json::json!({
                    "success": false,
                    "fallback": true,
                    "reason": reason.code(),
                    "message": reason.to_string(),
                })),
            )
                .into_response()
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use key_pool::{FileKeyStore, KeyPool, ManualClock};
    use removebg::RemovalConfig;
    use std::sync::Arc;

    const PNG_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUg==";

    async fn client(dir: &tempfile::TempDir, seed: &[&str]) -> RemovalClient {
        let store = Arc::new(
            FileKeyStore::load(dir.path().join("keys.json"))
                .await
                .unwrap(),
        );
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 11, 14, 10, 0, 0).unwrap(),
        ));
        let pool = Arc::new(KeyPool::new(store, clock));
        let secrets: Vec<common::Secret<String>> =
            seed.iter().map(|s| common::Secret::from(*s)).collect();
        pool.seed(&secrets).await.unwrap();
        RemovalClient::new(
            pool,
            reqwest::Client::new(),
            RemovalConfig {
                endpoint: "http://127.0.0.1:9/v1.0/removebg".into(),
                ..RemovalConfig::default()
            },
        )
    }

    async fn json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn invalid_data_url_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir, &[]).await;

        let err = remove_background(
            &client,
            RemoveBgRequest {
                image_base64: "data:image/png;base64,@@@".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn no_keys_is_fallback_with_no_credentials_reason() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir, &[]).await;

        let response = remove_background(
            &client,
            RemoveBgRequest {
                image_base64: PNG_URL.into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["fallback"], true);
        assert_eq!(body["reason"], "no_credentials");
    }

    #[tokio::test]
    async fn exhausted_pool_is_fallback_with_quota_reason() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir, &["rbg_one"]).await;
        let period = client.pool().current_period();
        client.pool().force_exhaust("key_1", &period).await;

        let response = remove_background(
            &client,
            RemoveBgRequest {
                image_base64: PNG_URL.into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(response).await["reason"], "quota_exhausted");
    }

    #[test]
    fn only_image_rejection_is_unprocessable() {
        assert_eq!(
            failure_status(&FailureReason::ImageRejected {
                status: 400,
                detail: String::new()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            failure_status(&FailureReason::QuotaExhausted),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            failure_status(&FailureReason::Internal("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

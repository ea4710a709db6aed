//! remove.bg HTTP client and the per-request retry loop

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use key_pool::{KeyPool, Period, SelectionResult};
use reqwest::multipart::{Form, Part};
use tracing::{debug, info, instrument, warn};

use crate::classify::{ErrorClassification, classify_status};
use crate::image::sniff_mime;
use crate::machine::{FailureReason, RemovalAction, RemovalEvent, RemovalPolicy, RemovalState};

/// Production remove.bg endpoint.
pub const REMOVE_BG_ENDPOINT: &str = "https://api.remove.bg/v1.0/removebg";

/// Longest slice of a provider error body kept for logs and failure details.
const DETAIL_LIMIT: usize = 200;

/// Client settings.
#[derive(Debug, Clone)]
pub struct RemovalConfig {
    pub endpoint: String,
    /// Per-call timeout; `None` leaves it to the HTTP client
    pub timeout: Option<Duration>,
    pub max_keys: usize,
    pub transient_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        let policy = RemovalPolicy::default();
        Self {
            endpoint: REMOVE_BG_ENDPOINT.to_string(),
            timeout: Some(Duration::from_secs(30)),
            max_keys: policy.max_keys,
            transient_retries: policy.transient_retries,
            retry_backoff: policy.retry_backoff,
        }
    }
}

impl RemovalConfig {
    pub fn policy(&self) -> RemovalPolicy {
        RemovalPolicy {
            max_keys: self.max_keys,
            transient_retries: self.transient_retries,
            retry_backoff: self.retry_backoff,
        }
    }
}

/// Image with its background removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub bytes: Bytes,
    pub mime: &'static str,
    /// Key the provider accepted
    pub key_id: String,
    /// Provider calls made for this request
    pub attempts: u32,
}

/// Result of one removal request. Failure is a value, not an error: the
/// caller always has its original image to fall back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Done(ProcessedImage),
    Failed(FailureReason),
}

impl RemovalOutcome {
    /// Metric label: `done` or the failure code.
    pub fn label(&self) -> &'static str {
        match self {
            RemovalOutcome::Done(_) => "done",
            RemovalOutcome::Failed(reason) => reason.code(),
        }
    }
}

/// Background-removal client over a shared key pool.
pub struct RemovalClient {
    pool: Arc<KeyPool>,
    http: reqwest::Client,
    config: RemovalConfig,
    policy: RemovalPolicy,
}

impl RemovalClient {
    pub fn new(pool: Arc<KeyPool>, http: reqwest::Client, config: RemovalConfig) -> Self {
        let policy = config.policy();
        Self {
            pool,
            http,
            config,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Remove the background from `image`, rotating through pool keys.
    ///
    /// The accounting period is fixed when the request starts, so a request
    /// straddling midnight at month end is accounted to the month it began in.
    pub async fn remove_background(&self, image: Bytes) -> RemovalOutcome {
        let period = self.pool.current_period();
        self.remove_background_in(image, period).await
    }

    #[instrument(skip_all, fields(period = %period, size = image.len()))]
    async fn remove_background_in(&self, image: Bytes, period: Period) -> RemovalOutcome {
        let (mut state, mut action) = self.policy.begin();
        let mut delivered: Option<(Bytes, &'static str)> = None;

        loop {
            let event = match action {
                RemovalAction::Finish => break,
                RemovalAction::Select { exclude } => self.select(&period, &exclude).await,
                RemovalAction::Exhaust { key_id, exclude } => {
                    self.pool.force_exhaust(&key_id, &period).await;
                    self.select(&period, &exclude).await
                }
                RemovalAction::Call { key } => {
                    self.call(&key, &period, &image, &mut delivered).await
                }
                RemovalAction::Retry { key, delay } => {
                    debug!(key_id = %key.id, delay_ms = delay.as_millis() as u64, "retrying key after transient failure");
                    tokio::time::sleep(delay).await;
                    self.call(&key, &period, &image, &mut delivered).await
                }
            };
            (state, action) = self.policy.handle_event(state, event);
        }

        match (state, delivered) {
            (RemovalState::Done { key_id, attempts }, Some((bytes, mime))) => {
                info!(key_id = %key_id, attempts, "background removed");
                RemovalOutcome::Done(ProcessedImage {
                    bytes,
                    mime,
                    key_id,
                    attempts,
                })
            }
            (RemovalState::Failed(reason), _) => {
                warn!(reason = reason.code(), error = %reason, "background removal failed, caller falls back");
                RemovalOutcome::Failed(reason)
            }
            (state, _) => RemovalOutcome::Failed(FailureReason::Internal(format!(
                "removal loop ended in {state:?} without an image"
            ))),
        }
    }

    async fn select(&self, period: &Period, exclude: &[String]) -> RemovalEvent {
        match self.pool.census(period).await {
            Ok(census) => RemovalEvent::Selected {
                total: census.total,
                candidate: census.first_excluding(exclude).cloned(),
            },
            Err(e) => {
                warn!(error = %e, "key store read failed");
                RemovalEvent::StoreFailed(e.to_string())
            }
        }
    }

    /// One provider call with `key`. On success the image lands in `delivered`.
    async fn call(
        &self,
        key: &SelectionResult,
        period: &Period,
        image: &Bytes,
        delivered: &mut Option<(Bytes, &'static str)>,
    ) -> RemovalEvent {
        let form = match upload_form(image) {
            Ok(form) => form,
            Err(e) => return transient(None, format!("failed to build upload: {e}")),
        };

        let mut request = self
            .http
            .post(&self.config.endpoint)
            .header("X-Api-Key", key.secret.expose().as_str())
            .multipart(form);
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let result = if e.is_timeout() { "timeout" } else { "network" };
                metrics::counter!("removebg_provider_calls_total", "result" => result)
                    .increment(1);
                warn!(key_id = %key.id, error = %e, "provider request failed");
                return transient(None, format!("provider request failed: {e}"));
            }
        };

        let status = response.status();
        if status.is_success() {
            // The provider has spent a credit whatever the body turns out to be
            self.pool.record_success(&key.id, period).await;

            let body = match response.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    metrics::counter!("removebg_provider_calls_total", "result" => "network")
                        .increment(1);
                    warn!(key_id = %key.id, error = %e, "failed to read provider response");
                    return transient(Some(status.as_u16()), format!("response read error: {e}"));
                }
            };
            return match sniff_mime(&body) {
                Some(mime) => {
                    metrics::counter!("removebg_provider_calls_total", "result" => "ok")
                        .increment(1);
                    *delivered = Some((body, mime));
                    RemovalEvent::Delivered
                }
                None => {
                    metrics::counter!("removebg_provider_calls_total", "result" => "malformed")
                        .increment(1);
                    warn!(key_id = %key.id, status = status.as_u16(), len = body.len(), "provider returned a non-image body");
                    transient(
                        Some(status.as_u16()),
                        "provider returned a non-image body".into(),
                    )
                }
            };
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(
                    key_id = %key.id,
                    status = status.as_u16(),
                    error = %e,
                    "failed to read provider error body, classifying on status alone"
                );
                String::new()
            }
        };
        let classification = classify_status(status.as_u16(), &body);
        metrics::counter!("removebg_provider_calls_total", "result" => classification.label())
            .increment(1);
        warn!(
            key_id = %key.id,
            status = status.as_u16(),
            classification = classification.label(),
            "provider rejected call"
        );
        RemovalEvent::CallFailed {
            classification,
            status: Some(status.as_u16()),
            detail: format!("HTTP {}: {}", status.as_u16(), truncate(&body)),
        }
    }
}

fn upload_form(image: &Bytes) -> reqwest::Result<Form> {
    let part = Part::bytes(image.to_vec())
        .file_name("signature.png")
        .mime_str("image/png")?;
    Ok(Form::new().part("image_file", part).text("size", "auto"))
}

fn transient(status: Option<u16>, detail: String) -> RemovalEvent {
    RemovalEvent::CallFailed {
        classification: ErrorClassification::Transient,
        status,
        detail,
    }
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= DETAIL_LIMIT {
        body.to_string()
    } else {
        let cut: String = body.chars().take(DETAIL_LIMIT).collect();
        format!("{cut}…")
    }
}

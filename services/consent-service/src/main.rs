//! Leave-consent form service
//!
//! Single-binary Rust service that:
//! 1. Validates leave-consent forms and hands back the PDF display values
//! 2. Removes signature backgrounds through remove.bg, rotating a pool of
//!    monthly-quota API keys and falling back to the original image
//! 3. Stores each signed-in user's last form so the next visit is prefilled
//! 4. Serves key pool administration on a separate, private listener

mod admin;
mod config;
mod error;
mod form;
mod metrics;
mod profile;
mod remove_bg;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use key_pool::{FileKeyStore, KeyPool};
use metrics_exporter_prometheus::PrometheusHandle;
use removebg::RemovalClient;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::error::ApiError;
use crate::form::ConsentForm;
use crate::profile::{Profile, ProfileStore};
use crate::remove_bg::RemoveBgRequest;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    removal: Arc<RemovalClient>,
    profiles: Arc<ProfileStore>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl AppState {
    fn pool(&self) -> &Arc<KeyPool> {
        self.removal.pool()
    }
}

/// Build the public router.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/remove-bg", post(remove_bg_handler))
        .route("/api/profile", get(get_profile).put(put_profile))
        .route("/api/consent/validate", post(validate_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting leave-consent");

    // Install before anything emits metrics
    let prometheus_handle = metrics::install_recorder()?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        endpoint = %config.removebg.endpoint,
        seed_keys = config.keys.seed_keys.len(),
        "configuration loaded"
    );

    // --- Key pool ---
    ensure_parent_dir(&config.keys.store_path).await?;
    let store = FileKeyStore::load(config.keys.store_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load key store from {}",
                config.keys.store_path.display()
            )
        })?;
    let pool = Arc::new(KeyPool::with_system_clock(Arc::new(store)));

    if !config.keys.seed_keys.is_empty() {
        let report = pool
            .seed(&config.keys.seed_keys)
            .await
            .context("failed to seed provider keys")?;
        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            "startup key seeding complete"
        );
    }

    let period = pool.current_period();
    let census = pool
        .census(&period)
        .await
        .context("failed to read key store")?;
    if census.total == 0 {
        warn!("no provider keys configured, background removal will fall back to original images");
    } else {
        info!(
            %period,
            keys_total = census.total,
            keys_available = census.candidates.len(),
            "key pool ready"
        );
    }

    // --- Removal client ---
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let removal = Arc::new(RemovalClient::new(
        pool.clone(),
        http,
        config.removebg.client_config(),
    ));

    // --- Profiles ---
    ensure_parent_dir(&config.profiles.store_path).await?;
    let profiles = ProfileStore::load(config.profiles.store_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load profile store from {}",
                config.profiles.store_path.display()
            )
        })?;

    let app_state = AppState {
        removal,
        profiles: Arc::new(profiles),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);
    let admin_app = build_admin_router(AdminState::new(pool));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_addr)
        .await
        .with_context(|| format!("failed to bind admin API to {}", config.server.admin_addr))?;

    info!(
        addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        "accepting requests"
    );

    // Both servers drain on the same signal; the drain timeout starts when it fires
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut public_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = public_rx.changed().await;
            })
            .await
    });

    let mut admin_rx = shutdown_rx;
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async move {
                let _ = admin_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let drained = async {
        let (public, admin) = tokio::join!(server_handle, admin_handle);
        for (name, result) in [("public", public), ("admin", admin)] {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(server = name, error = %e, "server error during shutdown"),
                Err(e) => error!(server = name, error = %e, "server task panicked"),
            }
        }
    };

    match tokio::time::timeout(DRAIN_TIMEOUT, drained).await {
        Ok(()) => info!("all in-flight requests drained"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Create the directory a store file lives in.
async fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Health endpoint: key pool totals for the current month.
///
/// `status` is `healthy` when every key has capacity, `degraded` when some do,
/// `unhealthy` when none do. The form still works in every case, so only a key
/// store failure answers 503.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let period = state.pool().current_period();

    let (status_code, body) = match state.pool().report(&period).await {
        Ok(report) => (
            StatusCode::OK,
            serde_json::json!({
                "status": report["status"],
                "uptime_seconds": uptime,
                "key_pool": {
                    "period": report["period"],
                    "quota": report["quota"],
                    "keys_total": report["keys_total"],
                    "keys_available": report["keys_available"],
                    "keys_exhausted": report["keys_exhausted"],
                },
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "uptime_seconds": uptime,
                "error": e.to_string(),
            }),
        ),
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn remove_bg_handler(
    State(state): State<AppState>,
    body: Result<axum::Json<RemoveBgRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let axum::Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    remove_bg::remove_background(&state.removal, request).await
}

/// GET /api/profile: the caller's saved form, or 404.
async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::Json<Profile>, ApiError> {
    let email = profile::identity(&headers)?;
    state
        .profiles
        .get(&email)
        .await
        .map(axum::Json)
        .ok_or_else(|| ApiError::NotFound("profile".into()))
}

/// PUT /api/profile: merge the supplied fields into the caller's profile.
async fn put_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<axum::Json<Profile>, JsonRejection>,
) -> Result<axum::Json<Profile>, ApiError> {
    let email = profile::identity(&headers)?;
    let axum::Json(patch) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let stored = state
        .profiles
        .merge(&email, patch, state.pool().now())
        .await?;
    Ok(axum::Json(stored))
}

/// POST /api/consent/validate: check a form and return its display values.
///
/// A signed-in caller's values are saved as their profile on success. A failed
/// save is logged and does not fail the request.
async fn validate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<axum::Json<ConsentForm>, JsonRejection>,
) -> Result<Response, ApiError> {
    let axum::Json(form) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let now = state.pool().now();

    match form.validate(now.date_naive()) {
        Ok(valid) => {
            if let Ok(email) = profile::identity(&headers) {
                if let Err(e) = state.profiles.merge(&email, form.to_profile(), now).await {
                    warn!(error = %e, "failed to save profile after validation");
                }
            }
            info!(file_name = %valid.file_name, "consent form validated");
            Ok((
                StatusCode::OK,
                axum::Json(serde_json::json!({
                    "valid": true,
                    "fileName": valid.file_name,
                    "form": valid,
                })),
            )
                .into_response())
        }
        Err(errors) => Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(serde_json::json!({
                "valid": false,
                "errors": errors,
            })),
        )
            .into_response()),
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use common::Secret;
    use key_pool::{KeyStore, ManualClock};
    use removebg::RemovalConfig;
    use tower::ServiceExt;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const PNG_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUg==";

    struct TestApp {
        state: AppState,
        store: Arc<FileKeyStore>,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        fn router(&self) -> Router {
            build_router(self.state.clone(), 100)
        }
    }

    /// App over temp stores with `secrets` seeded, calling `endpoint` for removal.
    async fn test_app(secrets: &[&str], endpoint: &str) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FileKeyStore::load(dir.path().join("keys.json"))
                .await
                .unwrap(),
        );
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 11, 4, 9, 30, 0).unwrap(),
        ));
        let pool = Arc::new(KeyPool::new(store.clone(), clock));
        let secrets: Vec<Secret<String>> = secrets.iter().map(|s| Secret::from(*s)).collect();
        pool.seed(&secrets).await.unwrap();

        let removal = Arc::new(RemovalClient::new(
            pool,
            reqwest::Client::new(),
            RemovalConfig {
                endpoint: endpoint.to_string(),
                timeout: Some(Duration::from_secs(5)),
                retry_backoff: Duration::from_millis(1),
                ..RemovalConfig::default()
            },
        ));
        let profiles = ProfileStore::load(dir.path().join("profiles.json"))
            .await
            .unwrap();

        TestApp {
            state: AppState {
                removal,
                profiles: Arc::new(profiles),
                prometheus: metrics::test_handle(),
                started_at: Instant::now(),
            },
            store,
            _dir: dir,
        }
    }

    /// Mock remove.bg: `rbg_good` gets a PNG, `rbg_broke` is out of credits.
    async fn start_provider() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let app = Router::new().route(
                "/v1.0/removebg",
                post(|headers: HeaderMap, _body: axum::body::Bytes| async move {
                    match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
                        Some("rbg_good") => (StatusCode::OK, PNG.to_vec()),
                        Some("rbg_broke") => (
                            StatusCode::PAYMENT_REQUIRED,
                            br#"{"errors":[{"title":"Insufficient credits"}]}"#.to_vec(),
                        ),
                        _ => (StatusCode::FORBIDDEN, b"auth failed".to_vec()),
                    }
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}/v1.0/removebg")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn valid_form() -> serde_json::Value {
        serde_json::json!({
            "studentName": "Asha Verma",
            "studentId": "2022A7PS0042P",
            "bhawan": "Meera",
            "leaveFrom": "2025-11-07",
            "leaveTo": "2025-11-12",
            "parentName": "R. Verma",
            "place": "Jaipur",
            "date": "2025-11-04",
            "mobile": "9876543210",
            "signatureDataUrl": PNG_URL,
        })
    }

    #[tokio::test]
    async fn health_reports_key_pool_totals() {
        let app = test_app(&["rbg_a", "rbg_b"], "http://127.0.0.1:9/").await;

        let (status, json) = send(
            app.router(),
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["key_pool"]["period"], "2025-11");
        assert_eq!(json["key_pool"]["keys_total"], 2);
        assert_eq!(json["key_pool"]["keys_available"], 2);
    }

    #[tokio::test]
    async fn health_without_keys_is_unhealthy_but_up() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;
        let (status, json) = send(
            app.router(),
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "unhealthy");
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;
        let response = app
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn remove_bg_rotates_past_exhausted_key() {
        let endpoint = start_provider().await;
        // key_1 is out of credits at the provider, key_2 works
        let app = test_app(&["rbg_broke", "rbg_good"], &endpoint).await;

        let (status, json) = send(
            app.router(),
            json_request(
                "POST",
                "/api/remove-bg",
                serde_json::json!({ "imageBase64": PNG_URL }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["keyId"], "key_2");
        assert!(
            json["image"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );

        let nov = key_pool::Period::new(2025, 11).unwrap();
        let key_1 = app.store.fetch_one("key_1").await.unwrap().unwrap();
        let key_2 = app.store.fetch_one("key_2").await.unwrap().unwrap();
        assert_eq!(key_1.usage_in(&nov), key_pool::EXHAUSTED_SENTINEL);
        assert_eq!(key_2.usage_in(&nov), 1);
    }

    #[tokio::test]
    async fn remove_bg_without_keys_falls_back() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;
        let (status, json) = send(
            app.router(),
            json_request(
                "POST",
                "/api/remove-bg",
                serde_json::json!({ "imageBase64": PNG_URL }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["fallback"], true);
        assert_eq!(json["reason"], "no_credentials");
    }

    #[tokio::test]
    async fn remove_bg_malformed_body_is_bad_request() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;
        let (status, json) = send(
            app.router(),
            json_request("POST", "/api/remove-bg", serde_json::json!({ "image": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn profile_requires_identity() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;
        let (status, json) = send(
            app.router(),
            Request::builder()
                .uri("/api/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["type"], "authentication_error");
    }

    #[tokio::test]
    async fn profile_put_then_get() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;

        let (status, _) = send(
            app.router(),
            Request::builder()
                .uri("/api/profile")
                .header("x-user-email", "asha@example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut put = json_request(
            "PUT",
            "/api/profile",
            serde_json::json!({ "studentName": "Asha", "mobile": "9876543210" }),
        );
        put.headers_mut()
            .insert("x-user-email", "Asha@Example.com".parse().unwrap());
        let (status, json) = send(app.router(), put).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["updatedAt"], "2025-11-04T09:30:00Z");

        let (status, json) = send(
            app.router(),
            Request::builder()
                .uri("/api/profile")
                .header("x-user-email", "asha@example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["studentName"], "Asha");
        assert_eq!(json["mobile"], "9876543210");
    }

    #[tokio::test]
    async fn validate_returns_display_values_and_saves_profile() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;

        let mut request = json_request("POST", "/api/consent/validate", valid_form());
        request
            .headers_mut()
            .insert("x-user-email", "asha@example.com".parse().unwrap());
        let (status, json) = send(app.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["valid"], true);
        assert_eq!(json["fileName"], "2022A7PS0042P_04nov.pdf");
        assert_eq!(json["form"]["leaveFrom"], "07 NOV 2025");

        let saved = app.state.profiles.get("asha@example.com").await.unwrap();
        assert_eq!(saved.leave_from.as_deref(), Some("2025-11-07"));
        assert_eq!(saved.signature_data_url.as_deref(), Some(PNG_URL));
    }

    #[tokio::test]
    async fn validate_reports_field_errors() {
        let app = test_app(&[], "http://127.0.0.1:9/").await;
        let mut form = valid_form();
        form["mobile"] = "12345".into();
        form["leaveTo"] = "2025-11-01".into();

        let (status, json) = send(
            app.router(),
            json_request("POST", "/api/consent/validate", form),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["valid"], false);
        let fields: Vec<&str> = json["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["mobile", "leaveTo"]);
    }

    #[tokio::test]
    async fn ensure_parent_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/keys.json");
        ensure_parent_dir(&path).await.unwrap();
        assert!(dir.path().join("a/b").is_dir());
        ensure_parent_dir(std::path::Path::new("keys.json"))
            .await
            .unwrap();
    }
}

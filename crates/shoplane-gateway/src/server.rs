//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use shoplane_core::config::ShoplaneConfig;
use shoplane_engine::BatchDriver;

use crate::auth::{verify_signature, SIGNATURE_HEADER};

/// Shared state for the gateway server.
pub struct AppState {
    pub driver: BatchDriver,
    /// Shared secret for the cron signature; empty disables auth.
    pub cron_secret: String,
    pub start_time: std::time::Instant,
}

/// One engine tick, guarded by the scheduler's signature.
async fn cron_tick(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify_signature(&state.cron_secret, uri.path(), signature) {
        tracing::warn!("⚠️ Rejected cron request with bad signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        );
    }

    match state.driver.run_tick().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::to_value(&summary).unwrap_or_default()),
        ),
        Err(e) => {
            tracing::error!("❌ Tick failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "tick failed", "details": e.to_string()})),
            )
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // some schedulers can only GET, others only POST; accept both
        .route("/api/cron/automations", get(cron_tick).post(cron_tick))
        .route("/api/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serving an unauthenticated tick endpoint must be an explicit choice,
/// not a forgotten config field.
fn check_cron_secret(secret: &str, allow_unsigned: bool) -> anyhow::Result<()> {
    if secret.is_empty() && !allow_unsigned {
        anyhow::bail!(
            "cron.secret is empty — set it in the [cron] config section, or set \
             SHOPLANE_ALLOW_UNSIGNED_CRON=1 for local development"
        );
    }
    Ok(())
}

/// Start the HTTP server.
pub async fn start(config: &ShoplaneConfig, driver: BatchDriver) -> anyhow::Result<()> {
    let allow_unsigned = std::env::var("SHOPLANE_ALLOW_UNSIGNED_CRON").is_ok();
    check_cron_secret(&config.cron.secret, allow_unsigned)?;
    if config.cron.secret.is_empty() {
        tracing::warn!("⚠️ cron.secret is empty — the tick endpoint is unauthenticated");
    }

    let state = Arc::new(AppState {
        driver,
        cron_secret: config.cron.secret.clone(),
        start_time: std::time::Instant::now(),
    });
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sign;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use shoplane_core::config::CronConfig;
    use shoplane_core::error::Result;
    use shoplane_core::traits::Mailer;
    use shoplane_store::SqliteStore;
    use tower::ServiceExt;

    struct NullMailer;

    #[async_trait]
    impl Mailer for NullMailer {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    fn app(secret: &str) -> Router {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let cron = CronConfig {
            secret: secret.into(),
            ..Default::default()
        };
        let driver = BatchDriver::new(store, Arc::new(NullMailer), cron);
        build_router(Arc::new(AppState {
            driver,
            cron_secret: secret.into(),
            start_time: std::time::Instant::now(),
        }))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_signed_tick_succeeds() {
        let app = app("s3cret");
        let sig = sign("s3cret", "/api/cron/automations");
        let resp = app
            .oneshot(
                Request::post("/api/cron/automations")
                    .header("X-Cron-Signature", sig)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["staleReclaimed"], 0);
        assert_eq!(body["scheduledRuns"]["processed"], 0);
        assert_eq!(body["abandonedCarts"]["checked"], 0);
        assert!(body["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let app = app("s3cret");
        let resp = app
            .oneshot(
                Request::get("/api/cron/automations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let app = app("s3cret");
        let resp = app
            .oneshot(
                Request::post("/api/cron/automations")
                    .header("X-Cron-Signature", sign("wrong", "/api/cron/automations"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_empty_secret_refused_without_override() {
        assert!(check_cron_secret("", false).is_err());
        assert!(check_cron_secret("", true).is_ok());
        assert!(check_cron_secret("s3cret", false).is_ok());
    }

    // dev mode: explicitly opted-in unsigned ticks still work
    #[tokio::test]
    async fn test_empty_secret_allows_unsigned() {
        let app = app("");
        let resp = app
            .oneshot(
                Request::get("/api/cron/automations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app("s3cret");
        let resp = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["ok"], true);
    }
}

//! Axum web server for live monitoring.
//!
//! Serves a REST API and a self-contained HTML page. Settings updates
//! and resets are queued and picked up by the feed pump between rounds.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Bind the dashboard port and serve in a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;

    info!(port, "Dashboard server listening on http://localhost:{port}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::PUT, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // API routes
        .route("/api/status", get(routes::get_status))
        .route("/api/rounds", get(routes::get_rounds))
        .route("/api/eta", get(routes::get_eta))
        .route("/api/backtest", get(routes::get_backtest))
        .route("/api/equity", get(routes::get_equity))
        .route("/api/signal", get(routes::get_signal))
        .route(
            "/api/settings",
            get(routes::get_settings).put(routes::put_settings),
        )
        .route("/api/reset/balance", post(routes::reset_balance))
        .route("/api/reset/daily", post(routes::reset_daily))
        .route("/health", get(routes::health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, SignalConfig};
    use crate::engine::RoundSettlementEngine;
    use crate::types::{Mode, RoundOutcome};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use routes::{ControlRequest, DashboardState};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let engine = RoundSettlementEngine::new(EngineSettings::default(), dec!(1000));
        Arc::new(DashboardState::new(&engine, SignalConfig::default()))
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let json = get_json(build_router(test_state()), "/api/status").await;
        assert_eq!(json["status"], "running");
        assert_eq!(json["next_target"].as_f64().unwrap(), 1.2);
        assert_eq!(json["mode"], "normal");
        assert_eq!(json["guard"]["phase"], "active");
        assert!(json["latest"].is_null());
    }

    #[tokio::test]
    async fn test_rounds_endpoint_after_settlement() {
        let settings = EngineSettings {
            auto_tune: false,
            ..EngineSettings::default()
        };
        let mut engine = RoundSettlementEngine::new(settings, dec!(1000));
        let state = Arc::new(DashboardState::new(&engine, SignalConfig::default()));
        engine
            .process_outcome(RoundOutcome::new(10.5, Utc::now() - Duration::seconds(10)))
            .unwrap();
        state.publish(&engine).await;

        let json = get_json(build_router(state), "/api/rounds").await;
        let rounds = json.as_array().unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0]["final"].as_f64().unwrap(), 10.5);
        assert_eq!(rounds[0]["success"], true);
    }

    #[tokio::test]
    async fn test_eta_and_backtest_null_when_empty() {
        let app = build_router(test_state());
        let eta = get_json(app.clone(), "/api/eta").await;
        assert!(eta["eta"].is_null());
        let backtest = get_json(app, "/api/backtest").await;
        assert!(backtest.is_null());
    }

    #[tokio::test]
    async fn test_equity_endpoint() {
        let json = get_json(build_router(test_state()), "/api/equity").await;
        assert_eq!(json["equity"].as_array().unwrap().len(), 1);
        assert!(json["pl_history"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signal_endpoint() {
        let json = get_json(build_router(test_state()), "/api/signal").await;
        assert!(json["message"].as_str().unwrap().contains("High Multiplier Signal"));
        assert!(json["telegram"].is_null());
    }

    #[tokio::test]
    async fn test_put_settings_endpoint() {
        let state = test_state();
        let app = build_router(state.clone());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode":"safe","stake_strategy":"kelly"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let pending = state.take_pending().await;
        assert_eq!(pending.len(), 1);
        match &pending[0] {
            ControlRequest::ReplaceSettings(settings) => {
                assert_eq!(settings.mode, Mode::Safe);
                assert_eq!(settings.risk_pct, 0.02);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_put_settings_coerces_negative_cooldown() {
        let state = test_state();
        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"cooldown_after":-1,"cooldown_len":3}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        match state.take_pending().await.as_slice() {
            [ControlRequest::ReplaceSettings(settings)] => {
                assert_eq!(settings.cooldown_after, 2);
                assert_eq!(settings.cooldown_len, 3);
            }
            other => panic!("unexpected requests {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_put_settings_rejects_bad_json() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode":"yolo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_reset_endpoint() {
        let state = test_state();
        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/reset/balance")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(state.take_pending().await, vec![ControlRequest::ResetBalance]);
    }

    #[tokio::test]
    async fn test_dashboard_html() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Cashout Oracle"));
        assert!(html.contains("Dashboard"));
    }

    #[tokio::test]
    async fn test_unknown_route_404() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

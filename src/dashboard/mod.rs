//! Dashboard: read-only Axum JSON API for monitoring the agent.
//!
//! CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

/// Start the dashboard web server.
///
/// This spawns a background task; it doesn't block. Bind or serve
/// failures are logged and only take down the dashboard.
pub fn spawn_dashboard(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(port, error = %e, "Failed to bind dashboard port");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/portfolio", get(routes::get_portfolio))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/reports", get(routes::get_reports))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engine::control::ControlLoop;
    use crate::types::{TradeAmount, TradeIntent, TradeSide};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn empty_state() -> AppState {
        Arc::new(DashboardState::new("VIGIL-TEST"))
    }

    async fn published_state() -> AppState {
        let now = Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap();
        let ctl = ControlLoop::new(&AppConfig::default(), now);
        let state = empty_state();
        state.publish(ctl.view(now)).await;
        state
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_before_first_tick() {
        let (status, json) = get_json(build_router(empty_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["agent"], "VIGIL-TEST");
        assert_eq!(json["ready"], false);
    }

    #[tokio::test]
    async fn test_status_unavailable_until_published() {
        let (status, _) = get_json(build_router(empty_state()), "/api/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (status, json) = get_json(build_router(published_state().await), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["budget_remaining"], 100_000);
        assert_eq!(json["schedule"].as_array().map(Vec::len), Some(4));
        assert_eq!(json["schedule"][3]["tier"], "full");
    }

    #[tokio::test]
    async fn test_portfolio_endpoint() {
        let (status, json) = get_json(build_router(published_state().await), "/api/portfolio").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["summary"]["total_value"], "10000");
        assert_eq!(json["valuation"]["stale"], false);
    }

    #[tokio::test]
    async fn test_trades_most_recent_first() {
        let now = Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap();
        let config = AppConfig::default();
        let mut portfolio = crate::portfolio::VirtualPortfolio::new(config.portfolio.clone());
        let prices: HashMap<String, Decimal> =
            [("BTCUSDT".to_string(), Decimal::from(100)), ("ETHUSDT".to_string(), Decimal::from(10))].into();
        for asset in ["BTCUSDT", "ETHUSDT"] {
            let intent = TradeIntent {
                asset: asset.into(),
                side: TradeSide::Buy,
                amount: TradeAmount::Notional(Decimal::from(500)),
                limit_price: None,
            };
            portfolio.apply_trade(&intent, &prices, now).unwrap();
        }
        let mut snapshot = ControlLoop::new(&config, now).snapshot(now);
        snapshot.portfolio = portfolio.state().clone();
        let ctl = ControlLoop::restore(&config, snapshot);

        let state = empty_state();
        state.publish(ctl.view(now)).await;
        let (status, json) = get_json(build_router(state), "/api/trades").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["asset"], "ETHUSDT");
        assert_eq!(json[1]["asset"], "BTCUSDT");
    }

    #[tokio::test]
    async fn test_reports_endpoint() {
        let (status, json) = get_json(build_router(published_state().await), "/api/reports").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!([]));
    }
}

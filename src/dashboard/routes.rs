//! Dashboard API route handlers.
//!
//! All endpoints return JSON from the last view published by the control
//! loop; handlers never touch live agent state.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::control::{LoopView, StatusView};
use crate::portfolio::{DailyReport, PortfolioSummary, Valuation};
use crate::types::TradeRecord;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub view: RwLock<Option<LoopView>>,
}

impl DashboardState {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            started_at: Utc::now(),
            view: RwLock::new(None),
        }
    }

    /// Replace the published view in one step.
    pub async fn publish(&self, view: LoopView) {
        *self.view.write().await = Some(view);
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub agent: String,
    pub uptime_secs: i64,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioResponse {
    pub summary: PortfolioSummary,
    pub valuation: Valuation,
}

type ApiResult<T> = Result<Json<T>, StatusCode>;

async fn with_view<T>(state: &AppState, f: impl FnOnce(&LoopView) -> T) -> ApiResult<T> {
    let guard = state.view.read().await;
    guard.as_ref().map(|v| Json(f(v))).ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ready = state.view.read().await.is_some();
    Json(HealthResponse {
        agent: state.agent_name.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        ready,
    })
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusView> {
    with_view(&state, |v| v.status.clone()).await
}

/// GET /api/portfolio
pub async fn get_portfolio(State(state): State<AppState>) -> ApiResult<PortfolioResponse> {
    with_view(&state, |v| PortfolioResponse {
        summary: v.summary.clone(),
        valuation: v.valuation.clone(),
    })
    .await
}

/// GET /api/trades (most recent first)
pub async fn get_trades(State(state): State<AppState>) -> ApiResult<Vec<TradeRecord>> {
    with_view(&state, |v| v.recent_trades.iter().rev().cloned().collect()).await
}

/// GET /api/reports
pub async fn get_reports(State(state): State<AppState>) -> ApiResult<Vec<DailyReport>> {
    with_view(&state, |v| v.reports.clone()).await
}

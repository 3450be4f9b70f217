//! Execution gateway: the external analysis/decision step.
//!
//! The control loop calls the gateway at most once per tick with the
//! chosen tier and current market context. The gateway reports how many
//! tokens the analysis actually used and which trades it proposes; the
//! loop owns charging the budget and applying the intents.

pub mod dry_run;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::portfolio::PortfolioSummary;
use crate::types::{AnalysisTier, GatewayError, MarketSignal, TradeIntent};

pub use dry_run::DryRunGateway;
pub use http::HttpGateway;

/// Request sent for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub tier: AnalysisTier,
    /// Forced by a market trigger rather than a timer.
    pub triggered: bool,
    pub signal: MarketSignal,
    pub portfolio: PortfolioSummary,
    pub budget_remaining: u64,
}

/// What the gateway returns on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Tokens actually consumed by the analysis.
    pub resource_cost: u64,
    #[serde(default)]
    pub trade_intents: Vec<TradeIntent>,
    /// Free-form reasoning; stored for audit, never interpreted.
    #[serde(default)]
    pub rationale: serde_json::Value,
}

/// Abstraction over whatever performs the analysis.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Run one analysis at `request.tier`.
    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<GatewayResponse, GatewayError>;

    /// Gateway name for logging.
    fn name(&self) -> &'static str;
}

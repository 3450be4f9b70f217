//! Dry-run gateway.
//!
//! Used when no gateway endpoint is configured. Charges the tier's
//! nominal cost and proposes no trades, so scheduling and budget
//! accounting run exactly as they would against a live gateway.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{AnalysisRequest, ExecutionGateway, GatewayResponse};
use crate::types::GatewayError;

#[derive(Debug, Default, Clone)]
pub struct DryRunGateway;

impl DryRunGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionGateway for DryRunGateway {
    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<GatewayResponse, GatewayError> {
        info!(
            tier = %request.tier,
            triggered = request.triggered,
            signal = %request.signal,
            "[DRY RUN] Would request analysis"
        );
        Ok(GatewayResponse {
            resource_cost: request.tier.estimated_cost(),
            trade_intents: Vec::new(),
            rationale: json!({
                "mode": "dry-run",
                "tier": request.tier,
            }),
        })
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

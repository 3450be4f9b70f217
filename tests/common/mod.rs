//! Shared fixtures for integration tests.
//!
//! `ScriptedGateway` is a deterministic `ExecutionGateway`: each call pops
//! the next scripted reply (or falls back to the tier's nominal cost with
//! no intents) and records the request, all in-memory.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use vigil::config::AppConfig;
use vigil::engine::ControlLoop;
use vigil::feed::FeedUpdate;
use vigil::gateway::{AnalysisRequest, ExecutionGateway, GatewayResponse};
use vigil::types::{GatewayError, PriceQuote, TradeAmount, TradeIntent, TradeSide};

#[derive(Clone, Default)]
pub struct ScriptedGateway {
    replies: Arc<Mutex<VecDeque<Result<GatewayResponse, GatewayError>>>>,
    calls: Arc<Mutex<Vec<AnalysisRequest>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, resource_cost: u64, intents: Vec<TradeIntent>) {
        self.replies.lock().unwrap().push_back(Ok(GatewayResponse {
            resource_cost,
            trade_intents: intents,
            rationale: serde_json::json!({"source": "script"}),
        }));
    }

    pub fn push_err(&self, error: GatewayError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<AnalysisRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionGateway for ScriptedGateway {
    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<GatewayResponse, GatewayError> {
        self.calls.lock().unwrap().push(request.clone());
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(GatewayResponse {
                resource_cost: request.tier.estimated_cost(),
                trade_intents: Vec::new(),
                rationale: serde_json::Value::Null,
            })
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Wednesday 2025-03-12 at `h:m` UTC (weekday, active hours).
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 12, h, m, 0).unwrap()
}

pub fn quote(asset: &str, price: Decimal, volume: Decimal, as_of: DateTime<Utc>) -> FeedUpdate {
    FeedUpdate::Quote(PriceQuote {
        asset: asset.to_string(),
        price,
        volume_24h: volume,
        as_of,
    })
}

pub fn buy(asset: &str, usd: Decimal) -> TradeIntent {
    TradeIntent {
        asset: asset.to_string(),
        side: TradeSide::Buy,
        amount: TradeAmount::Notional(usd),
        limit_price: None,
    }
}

pub fn sell(asset: &str, qty: Decimal) -> TradeIntent {
    TradeIntent {
        asset: asset.to_string(),
        side: TradeSide::Sell,
        amount: TradeAmount::Quantity(qty),
        limit_price: None,
    }
}

/// A fresh control loop with one quote in its price book.
pub fn primed_loop(config: &AppConfig, start: DateTime<Utc>) -> ControlLoop {
    let mut ctl = ControlLoop::new(config, start);
    ctl.ingest(quote("BTCUSDT", Decimal::from(46_000), Decimal::from(1_000), start));
    ctl
}

/// A control loop that has already run its start-up `Full` at `start`.
pub async fn settled_loop(config: &AppConfig, start: DateTime<Utc>) -> ControlLoop {
    let mut ctl = primed_loop(config, start);
    ctl.tick(start, &ScriptedGateway::new()).await;
    ctl
}

//! HTTP execution gateway.
//!
//! POSTs the `AnalysisRequest` as JSON to a configured endpoint and
//! expects a `GatewayResponse` body back. Rate limits and server errors
//! are retried with exponential backoff; everything else is surfaced as
//! a `GatewayError` for the control loop to treat as a skipped tick.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use super::{AnalysisRequest, ExecutionGateway, GatewayResponse};
use crate::config::{AppConfig, GatewayConfig};
use crate::types::GatewayError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

/// Floor for a single attempt's timeout.
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Total backoff slept across all retries.
fn total_backoff() -> Duration {
    Duration::from_millis((0..MAX_RETRIES).map(|i| BASE_BACKOFF_MS * 2u64.pow(i)).sum())
}

/// Per-attempt timeout, so every attempt plus the backoff between them
/// fits inside the caller's overall `total_secs`.
pub fn attempt_timeout(total_secs: u64) -> Duration {
    let usable = Duration::from_secs(total_secs).saturating_sub(total_backoff());
    (usable / (MAX_RETRIES + 1)).max(MIN_ATTEMPT_TIMEOUT)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpGateway {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    attempt_timeout: Duration,
}

impl HttpGateway {
    /// `timeout_secs` is the budget for the whole call, retries included.
    pub fn new(endpoint: String, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let attempt_timeout = attempt_timeout(timeout_secs);
        let http = Client::builder()
            .timeout(attempt_timeout)
            .build()
            .context("Failed to build HTTP client for execution gateway")?;

        Ok(Self {
            http,
            endpoint,
            api_key,
            attempt_timeout,
        })
    }

    /// Build from config; `None` when no endpoint is set.
    ///
    /// The API key is optional: a missing env var just means no
    /// `Authorization` header.
    pub fn from_config(config: &GatewayConfig) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };
        let api_key = AppConfig::resolve_env(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "Gateway API key not set; sending unauthenticated requests");
        }
        Self::new(endpoint, api_key, config.timeout_secs).map(Some)
    }

    /// Timed-out attempts are retried; other transport errors are not.
    fn map_send_error(&self, e: reqwest::Error) -> Attempt {
        if e.is_timeout() {
            Attempt::Retry(GatewayError::Timeout(self.attempt_timeout.as_secs()))
        } else {
            Attempt::Fatal(GatewayError::Network(e.to_string()))
        }
    }

    async fn post_once(&self, request: &AnalysisRequest) -> Result<GatewayResponse, Attempt> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| self.map_send_error(e))?;
            return parse_response(&body).map_err(Attempt::Fatal);
        }

        let body = response.text().await.unwrap_or_default();
        let err = GatewayError::Network(format!("HTTP {status}: {body}"));
        if is_retryable(status) {
            Err(Attempt::Retry(err))
        } else {
            Err(Attempt::Fatal(err))
        }
    }
}

enum Attempt {
    Retry(GatewayError),
    Fatal(GatewayError),
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Decode a gateway body, rejecting anything that isn't a valid response.
pub fn parse_response(body: &str) -> Result<GatewayResponse, GatewayError> {
    serde_json::from_str(body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ExecutionGateway for HttpGateway {
    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<GatewayResponse, GatewayError> {
        let mut last_error = GatewayError::Network("no attempt made".to_string());

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, "Retrying gateway call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.post_once(request).await {
                Ok(response) => {
                    debug!(
                        tier = %request.tier,
                        cost = response.resource_cost,
                        intents = response.trade_intents.len(),
                        "Gateway responded"
                    );
                    return Ok(response);
                }
                Err(Attempt::Retry(e)) => {
                    warn!(attempt, error = %e, "Retryable gateway error");
                    last_error = e;
                }
                Err(Attempt::Fatal(e)) => return Err(e),
            }
        }

        Err(last_error)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TradeAmount, TradeSide};
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_full_response() {
        let body = r#"{
            "resource_cost": 7421,
            "trade_intents": [
                {"asset": "BTCUSDT", "side": "BUY", "amount": {"notional": "500"}},
                {"asset": "ETHUSDT", "side": "SELL", "amount": {"quantity": "0.25"}, "limit_price": "3100"}
            ],
            "rationale": {"summary": "momentum"}
        }"#;
        let resp = parse_response(body).unwrap();
        assert_eq!(resp.resource_cost, 7421);
        assert_eq!(resp.trade_intents.len(), 2);
        assert_eq!(resp.trade_intents[0].amount, TradeAmount::Notional(dec!(500)));
        assert_eq!(resp.trade_intents[1].side, TradeSide::Sell);
        assert_eq!(resp.trade_intents[1].limit_price, Some(dec!(3100)));
    }

    #[test]
    fn test_parse_minimal_response() {
        let resp = parse_response(r#"{"resource_cost": 1200}"#).unwrap();
        assert!(resp.trade_intents.is_empty());
        assert!(resp.rationale.is_null());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_response("<html>Bad Gateway</html>"),
            Err(GatewayError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_response(r#"{"resource_cost": -5}"#),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_attempt_timeout_leaves_room_for_retries() {
        assert_eq!(attempt_timeout(300), Duration::from_secs(99));
        for total in [10, 60, 300, 3600] {
            let spent = attempt_timeout(total) * (MAX_RETRIES + 1) + total_backoff();
            assert!(spent <= Duration::from_secs(total), "total {total}s overrun: {spent:?}");
        }
    }

    #[test]
    fn test_attempt_timeout_floor() {
        assert_eq!(attempt_timeout(1), MIN_ATTEMPT_TIMEOUT);
    }

    #[test]
    fn test_from_config_without_endpoint() {
        let gw = HttpGateway::from_config(&GatewayConfig::default()).unwrap();
        assert!(gw.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let gw = HttpGateway::new("http://127.0.0.1:9/analyze".into(), None, 2).unwrap();
        let req = AnalysisRequest {
            tier: crate::types::AnalysisTier::Quick,
            triggered: false,
            signal: crate::types::MarketSignal::quiet(chrono::Utc::now()),
            portfolio: crate::portfolio::VirtualPortfolio::new(Default::default())
                .summary(&std::collections::HashMap::new()),
            budget_remaining: 10_000,
        };
        let err = gw.run_analysis(&req).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_) | GatewayError::Timeout(_)));
    }
}

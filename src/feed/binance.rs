//! Binance public market data.
//!
//! API docs: https://binance-docs.github.io/apidocs/spot/en/
//! Endpoint: `GET /api/v3/ticker/24hr?symbol=BTCUSDT`
//! Auth: not required. Numbers arrive as decimal strings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::PriceFeed;
use crate::config::FeedConfig;
use crate::types::{PriceQuote, PriceUnavailable};

const FEED_NAME: &str = "binance";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    /// 24h volume in the quote asset (USDT).
    quote_volume: String,
    /// Epoch millis.
    close_time: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceFeed {
    http: Client,
    base_url: String,
}

impl BinanceFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn ticker_url(&self) -> String {
        format!("{}/api/v3/ticker/24hr", self.base_url)
    }
}

fn unavailable(asset: &str, reason: impl ToString) -> PriceUnavailable {
    PriceUnavailable {
        asset: asset.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a 24h ticker body into a quote.
fn parse_ticker(asset: &str, body: &str) -> Result<PriceQuote, PriceUnavailable> {
    let ticker: Ticker24h =
        serde_json::from_str(body).map_err(|e| unavailable(asset, format!("bad ticker JSON: {e}")))?;

    if !ticker.symbol.eq_ignore_ascii_case(asset) {
        return Err(unavailable(asset, format!("ticker is for {}", ticker.symbol)));
    }

    let price = Decimal::from_str(&ticker.last_price)
        .map_err(|e| unavailable(asset, format!("bad lastPrice: {e}")))?;
    if price <= Decimal::ZERO {
        return Err(unavailable(asset, "non-positive lastPrice"));
    }
    let volume_24h = Decimal::from_str(&ticker.quote_volume)
        .map_err(|e| unavailable(asset, format!("bad quoteVolume: {e}")))?;
    let as_of: DateTime<Utc> = Utc
        .timestamp_millis_opt(ticker.close_time)
        .single()
        .ok_or_else(|| unavailable(asset, "bad closeTime"))?;

    Ok(PriceQuote {
        asset: asset.to_string(),
        price,
        volume_24h,
        as_of,
    })
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    async fn quote(&self, asset: &str) -> Result<PriceQuote, PriceUnavailable> {
        let response = self
            .http
            .get(self.ticker_url())
            .query(&[("symbol", asset)])
            .send()
            .await
            .map_err(|e| unavailable(asset, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| unavailable(asset, e))?;
        if !status.is_success() {
            return Err(unavailable(asset, format!("HTTP {status}: {body}")));
        }

        let quote = parse_ticker(asset, &body)?;
        debug!(asset, price = %quote.price, "Binance quote");
        Ok(quote)
    }

    fn name(&self) -> &'static str {
        FEED_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

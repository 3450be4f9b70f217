//! Shared types for the VIGIL agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the engine, portfolio, gateway
//! and feed modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Analysis tiers
// ---------------------------------------------------------------------------

/// Depth of analysis requested from the execution gateway.
///
/// Ordered by rank: `Monitor < Quick < Medium < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisTier {
    /// Price checks only. Never calls the gateway.
    Monitor,
    Quick,
    Medium,
    Full,
}

impl AnalysisTier {
    /// All tiers in ascending rank.
    pub const ALL: [AnalysisTier; 4] = [
        AnalysisTier::Monitor,
        AnalysisTier::Quick,
        AnalysisTier::Medium,
        AnalysisTier::Full,
    ];

    /// Nominal token cost used when reserving budget.
    pub fn estimated_cost(self) -> u64 {
        match self {
            AnalysisTier::Monitor => 0,
            AnalysisTier::Quick => 2_000,
            AnalysisTier::Medium => 8_000,
            AnalysisTier::Full => 25_000,
        }
    }

    /// Position in `ALL` (0 = Monitor).
    pub fn rank(self) -> usize {
        self as usize
    }

    /// The next tier down, or `None` for `Monitor`.
    pub fn lower(self) -> Option<AnalysisTier> {
        match self {
            AnalysisTier::Monitor => None,
            AnalysisTier::Quick => Some(AnalysisTier::Monitor),
            AnalysisTier::Medium => Some(AnalysisTier::Quick),
            AnalysisTier::Full => Some(AnalysisTier::Medium),
        }
    }

    /// Whether running this tier requires an execution gateway call.
    pub fn invokes_gateway(self) -> bool {
        self != AnalysisTier::Monitor
    }
}

impl fmt::Display for AnalysisTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisTier::Monitor => write!(f, "monitor"),
            AnalysisTier::Quick => write!(f, "quick"),
            AnalysisTier::Medium => write!(f, "medium"),
            AnalysisTier::Full => write!(f, "full"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// A single price/volume observation from the price feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: String,
    pub price: Decimal,
    /// Rolling 24h quote volume.
    pub volume_24h: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Market condition reading produced by the monitor.
///
/// All values are percentages (5.0 = 5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    /// Magnitude of the latest price move against the window baseline.
    pub volatility_pct: f64,
    /// Signed volume change against the window baseline.
    pub volume_surge_pct: f64,
    /// Signed price change against the window baseline.
    pub price_change_pct: f64,
    /// Asset carrying the strongest reading, if any samples exist.
    pub asset: Option<String>,
    pub sampled_at: DateTime<Utc>,
}

impl MarketSignal {
    /// A flat reading (no samples or no movement).
    pub fn quiet(sampled_at: DateTime<Utc>) -> Self {
        Self {
            volatility_pct: 0.0,
            volume_surge_pct: 0.0,
            price_change_pct: 0.0,
            asset: None,
            sampled_at,
        }
    }
}

impl fmt::Display for MarketSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] vol={:.2}% volume={:+.2}% move={:+.2}%",
            self.asset.as_deref().unwrap_or("-"),
            self.volatility_pct,
            self.volume_surge_pct,
            self.price_change_pct,
        )
    }
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Size of a trade intent: either units of the asset or a USD amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAmount {
    Quantity(Decimal),
    Notional(Decimal),
}

impl TradeAmount {
    /// Resolve to a quantity at the given execution price. `None` when the
    /// division overflows.
    pub fn quantity_at(&self, price: Decimal) -> Option<Decimal> {
        match *self {
            TradeAmount::Quantity(q) => Some(q),
            TradeAmount::Notional(n) if price > Decimal::ZERO => n.checked_div(price),
            TradeAmount::Notional(_) => Some(Decimal::ZERO),
        }
    }
}

/// An unvalidated buy/sell instruction proposed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub asset: String,
    pub side: TradeSide,
    pub amount: TradeAmount,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
}

impl fmt::Display for TradeIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let amount = match self.amount {
            TradeAmount::Quantity(q) => format!("{q} units"),
            TradeAmount::Notional(n) => format!("${n:.2}"),
        };
        write!(f, "{} {} {}", self.side, amount, self.asset)?;
        if let Some(limit) = self.limit_price {
            write!(f, " limit ${limit}")?;
        }
        Ok(())
    }
}

/// An open holding in the virtual portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub asset: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
}

impl Position {
    /// Unrealized P&L at the given price.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.average_cost) * self.quantity
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} qty={} avg=${:.4}", self.asset, self.quantity, self.average_cost)
    }
}

/// Immutable, append-only record of an executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub asset: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    pub fee: Decimal,
    /// Present on SELLs only.
    pub realized_pnl: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ ${:.4} (${:.2}, fee ${:.4})",
            self.side, self.quantity, self.asset, self.price, self.notional, self.fee,
        )?;
        if let Some(pnl) = self.realized_pnl {
            write!(f, " pnl ${pnl:+.2}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A tier's estimated cost does not fit the remaining daily budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Budget exceeded: requested {requested} tokens, {remaining} remaining")]
pub struct BudgetExceeded {
    pub requested: u64,
    pub remaining: u64,
}

/// Failure of the external execution gateway. Always transient for the loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway timed out after {0}s")]
    Timeout(u64),

    #[error("Gateway network error: {0}")]
    Network(String),

    #[error("Gateway returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Gateway call cancelled")]
    Cancelled,
}

/// The price feed could not produce a quote.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Price unavailable for {asset}: {reason}")]
pub struct PriceUnavailable {
    pub asset: String,
    pub reason: String,
}

/// A trade intent that would break a portfolio rule. The ledger is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantError {
    #[error("No known price for {asset}")]
    NoPrice { asset: String },

    #[error("Non-positive trade size for {asset}")]
    NonPositiveAmount { asset: String },

    #[error("Trade size for {asset} out of range")]
    AmountOutOfRange { asset: String },

    #[error("{side} {asset} limit ${limit} not met at ${price}")]
    LimitNotMet {
        asset: String,
        side: TradeSide,
        limit: Decimal,
        price: Decimal,
    },

    #[error("Notional ${notional:.2} for {asset} below minimum ${minimum:.2}")]
    BelowMinimum {
        asset: String,
        notional: Decimal,
        minimum: Decimal,
    },

    #[error("Insufficient cash: need ${needed:.2}, have ${available:.2}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("Insufficient {asset} position: selling {requested}, holding {held}")]
    InsufficientPosition {
        asset: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("Allocation to {asset} would be {allocation:.4} of portfolio (cap {cap})")]
    AllocationExceeded {
        asset: String,
        allocation: Decimal,
        cap: Decimal,
    },

    #[error("Position count would be {count} (max {max})")]
    TooManyPositions { count: usize, max: usize },
}

/// A configuration value is unrecognised or out of range. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid configuration `{field}` = {value}: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &str, value: impl fmt::Display, reason: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // -- AnalysisTier tests --

    #[test]
    fn test_tier_ordering() {
        assert!(AnalysisTier::Monitor < AnalysisTier::Quick);
        assert!(AnalysisTier::Quick < AnalysisTier::Medium);
        assert!(AnalysisTier::Medium < AnalysisTier::Full);
        assert_eq!(AnalysisTier::ALL.iter().max(), Some(&AnalysisTier::Full));
    }

    #[test]
    fn test_tier_costs_increase_with_rank() {
        for pair in AnalysisTier::ALL.windows(2) {
            assert!(pair[0].estimated_cost() < pair[1].estimated_cost());
        }
        assert_eq!(AnalysisTier::Monitor.estimated_cost(), 0);
    }

    #[test]
    fn test_tier_lower_chain() {
        assert_eq!(AnalysisTier::Full.lower(), Some(AnalysisTier::Medium));
        assert_eq!(AnalysisTier::Medium.lower(), Some(AnalysisTier::Quick));
        assert_eq!(AnalysisTier::Quick.lower(), Some(AnalysisTier::Monitor));
        assert_eq!(AnalysisTier::Monitor.lower(), None);
    }

    #[test]
    fn test_tier_rank_matches_all() {
        for (i, tier) in AnalysisTier::ALL.iter().enumerate() {
            assert_eq!(tier.rank(), i);
        }
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AnalysisTier::Medium).unwrap(), "\"medium\"");
    }

    // -- Trade types --

    #[test]
    fn test_side_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TradeSide::Buy).unwrap(), "\"BUY\"");
        let sell: TradeSide = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(sell, TradeSide::Sell);
    }

    #[test]
    fn test_amount_quantity_at() {
        assert_eq!(TradeAmount::Quantity(dec!(2)).quantity_at(dec!(50)), Some(dec!(2)));
        assert_eq!(TradeAmount::Notional(dec!(100)).quantity_at(dec!(50)), Some(dec!(2)));
        assert_eq!(TradeAmount::Notional(dec!(100)).quantity_at(Decimal::ZERO), Some(Decimal::ZERO));
        assert_eq!(TradeAmount::Notional(Decimal::MAX).quantity_at(dec!(0.0001)), None);
    }

    #[test]
    fn test_intent_parses_from_gateway_json() {
        let json = r#"{"asset":"BTCUSDT","side":"BUY","amount":{"notional":"500"},"limit_price":"46000"}"#;
        let intent: TradeIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.side, TradeSide::Buy);
        assert_eq!(intent.amount, TradeAmount::Notional(dec!(500)));
        assert_eq!(intent.limit_price, Some(dec!(46000)));
    }

    #[test]
    fn test_intent_limit_defaults_to_none() {
        let json = r#"{"asset":"ETHUSDT","side":"SELL","amount":{"quantity":0.5}}"#;
        let intent: TradeIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.limit_price, None);
        assert_eq!(intent.amount, TradeAmount::Quantity(dec!(0.5)));
    }

    #[test]
    fn test_position_unrealized_pnl() {
        let pos = Position {
            asset: "BTCUSDT".into(),
            quantity: dec!(0.0888),
            average_cost: dec!(45000),
        };
        assert_eq!(pos.unrealized_pnl(dec!(46000)), dec!(88.8));
    }

    #[test]
    fn test_signal_display() {
        let signal = MarketSignal {
            volatility_pct: 6.5,
            volume_surge_pct: -12.0,
            price_change_pct: -6.5,
            asset: Some("SOLUSDT".into()),
            sampled_at: Utc::now(),
        };
        let display = format!("{signal}");
        assert!(display.contains("SOLUSDT"));
        assert!(display.contains("6.50%"));
    }

    // -- Errors --

    #[test]
    fn test_error_messages() {
        let err = BudgetExceeded { requested: 25_000, remaining: 9_000 };
        assert_eq!(err.to_string(), "Budget exceeded: requested 25000 tokens, 9000 remaining");

        let err = InvariantError::TooManyPositions { count: 6, max: 5 };
        assert!(err.to_string().contains("max 5"));

        let err = ConfigError::new("portfolio.fee_rate", 0.2, "must be within 0..=0.05");
        assert!(err.to_string().contains("portfolio.fee_rate"));
    }
}

//! Virtual portfolio ledger.
//!
//! Applies trade intents from the gateway against a simulated cash
//! account. Every intent is validated in full before anything is
//! written, so a rejected intent leaves the ledger exactly as it was.
//!
//! Validation order for a priced intent:
//! 1. minimum notional (waived when a SELL closes the whole position)
//! 2. cash (BUY, notional plus fee) or held quantity (SELL)
//! 3. allocation cap for the traded asset after the trade (BUY)
//! 4. open position count after the trade (BUY)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PortfolioConfig;
use crate::portfolio::prices::PriceLookup;
use crate::portfolio::report::PortfolioSummary;
use crate::types::{InvariantError, Position, TradeIntent, TradeRecord, TradeSide};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Persistent portfolio state.
///
/// Invariants: `cash >= 0`, every position has `quantity > 0`, and
/// `trade_history` is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub initial_cash: Decimal,
    pub cash: Decimal,
    pub positions: BTreeMap<String, Position>,
    pub trade_history: Vec<TradeRecord>,
}

impl PortfolioState {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            positions: BTreeMap::new(),
            trade_history: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionValue {
    pub asset: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    /// Price used; falls back to average cost if the asset was never quoted.
    pub price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub cash: Decimal,
    pub total_value: Decimal,
    pub positions: Vec<PositionValue>,
    /// At least one position is priced from a stale or missing quote.
    pub stale: bool,
}

impl Valuation {
    pub fn position(&self, asset: &str) -> Option<&PositionValue> {
        self.positions.iter().find(|p| p.asset == asset)
    }
}

// ---------------------------------------------------------------------------
// Batch result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RejectedIntent {
    pub intent: TradeIntent,
    pub reason: InvariantError,
}

/// Result of applying one gateway response's intents.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub executed: Vec<TradeRecord>,
    pub rejected: Vec<RejectedIntent>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct VirtualPortfolio {
    state: PortfolioState,
    config: PortfolioConfig,
}

/// Everything needed to commit a validated trade.
struct Fill {
    quantity: Decimal,
    price: Decimal,
    notional: Decimal,
    fee: Decimal,
}

impl VirtualPortfolio {
    pub fn new(config: PortfolioConfig) -> Self {
        Self {
            state: PortfolioState::new(config.initial_cash),
            config,
        }
    }

    /// Resume from a persisted state. Rules come from the current config.
    pub fn restore(state: PortfolioState, config: PortfolioConfig) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn cash(&self) -> Decimal {
        self.state.cash
    }

    pub fn position(&self, asset: &str) -> Option<&Position> {
        self.state.positions.get(asset)
    }

    /// Mark every position to market. Pure read.
    pub fn valuation(&self, prices: &dyn PriceLookup) -> Valuation {
        let mut total_value = self.state.cash;
        let mut any_stale = false;

        let positions = self
            .state
            .positions
            .values()
            .map(|pos| {
                let (price, stale) = match prices.mark(&pos.asset) {
                    Some(mark) => (mark.price, mark.stale),
                    None => (pos.average_cost, true),
                };
                let market_value = pos.quantity * price;
                total_value += market_value;
                any_stale |= stale;
                PositionValue {
                    asset: pos.asset.clone(),
                    quantity: pos.quantity,
                    average_cost: pos.average_cost,
                    price,
                    market_value,
                    unrealized_pnl: pos.unrealized_pnl(price),
                    stale,
                }
            })
            .collect();

        Valuation {
            cash: self.state.cash,
            total_value,
            positions,
            stale: any_stale,
        }
    }

    pub fn summary(&self, prices: &dyn PriceLookup) -> PortfolioSummary {
        PortfolioSummary::build(&self.state, &self.valuation(prices))
    }

    /// Validate and apply one intent. On error nothing is changed.
    pub fn apply_trade(
        &mut self,
        intent: &TradeIntent,
        prices: &dyn PriceLookup,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord, InvariantError> {
        let fill = self.validate(intent, prices)?;
        Ok(self.commit(intent, fill, now))
    }

    /// Apply intents strictly in order; a rejection does not stop the rest.
    pub fn apply_batch(
        &mut self,
        intents: &[TradeIntent],
        prices: &dyn PriceLookup,
        now: DateTime<Utc>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for intent in intents {
            match self.apply_trade(intent, prices, now) {
                Ok(record) => report.executed.push(record),
                Err(reason) => {
                    warn!(intent = %intent, reason = %reason, "Trade intent rejected");
                    report.rejected.push(RejectedIntent {
                        intent: intent.clone(),
                        reason,
                    });
                }
            }
        }

        if !intents.is_empty() {
            info!(
                executed = report.executed.len(),
                rejected = report.rejected.len(),
                cash = format!("${:.2}", self.state.cash),
                "Trade batch applied"
            );
        }
        report
    }

    fn validate(&self, intent: &TradeIntent, prices: &dyn PriceLookup) -> Result<Fill, InvariantError> {
        let asset = intent.asset.as_str();
        let price = prices
            .price(asset)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| InvariantError::NoPrice { asset: asset.to_string() })?;

        if let Some(limit) = intent.limit_price {
            let not_met = match intent.side {
                TradeSide::Buy => price > limit,
                TradeSide::Sell => price < limit,
            };
            if not_met {
                return Err(InvariantError::LimitNotMet {
                    asset: asset.to_string(),
                    side: intent.side,
                    limit,
                    price,
                });
            }
        }

        let out_of_range = || InvariantError::AmountOutOfRange { asset: asset.to_string() };
        let quantity = intent.amount.quantity_at(price).ok_or_else(out_of_range)?;
        if quantity <= Decimal::ZERO {
            return Err(InvariantError::NonPositiveAmount { asset: asset.to_string() });
        }
        let notional = quantity.checked_mul(price).ok_or_else(out_of_range)?;
        let fee = notional.checked_mul(self.config.fee_rate).ok_or_else(out_of_range)?;
        let held = self.position(asset).map_or(Decimal::ZERO, |p| p.quantity);

        // 1. minimum notional
        let closes_position = intent.side == TradeSide::Sell && quantity == held;
        if notional < self.config.min_position_usd && !closes_position {
            return Err(InvariantError::BelowMinimum {
                asset: asset.to_string(),
                notional,
                minimum: self.config.min_position_usd,
            });
        }

        match intent.side {
            TradeSide::Sell => {
                // 2. position sufficiency; SELLs never raise allocation or count
                if quantity > held {
                    return Err(InvariantError::InsufficientPosition {
                        asset: asset.to_string(),
                        requested: quantity,
                        held,
                    });
                }
            }
            TradeSide::Buy => {
                // 2. cash sufficiency
                let needed = notional.checked_add(fee).ok_or_else(out_of_range)?;
                if needed > self.state.cash {
                    return Err(InvariantError::InsufficientCash {
                        needed,
                        available: self.state.cash,
                    });
                }

                // 3. allocation cap, against post-trade total value
                let post_total = self.valuation(prices).total_value - fee;
                let post_exposure = held
                    .checked_add(quantity)
                    .and_then(|q| q.checked_mul(price))
                    .ok_or_else(out_of_range)?;
                if post_total <= Decimal::ZERO
                    || post_exposure > self.config.max_allocation_fraction * post_total
                {
                    let allocation = if post_total > Decimal::ZERO {
                        post_exposure / post_total
                    } else {
                        Decimal::ONE
                    };
                    return Err(InvariantError::AllocationExceeded {
                        asset: asset.to_string(),
                        allocation,
                        cap: self.config.max_allocation_fraction,
                    });
                }

                // 4. position count
                if held.is_zero() {
                    let count = self.state.positions.len() + 1;
                    if count > self.config.max_positions {
                        return Err(InvariantError::TooManyPositions {
                            count,
                            max: self.config.max_positions,
                        });
                    }
                }
            }
        }

        Ok(Fill {
            quantity,
            price,
            notional,
            fee,
        })
    }

    fn commit(&mut self, intent: &TradeIntent, fill: Fill, now: DateTime<Utc>) -> TradeRecord {
        let Fill {
            quantity,
            price,
            notional,
            fee,
        } = fill;

        let realized_pnl = match intent.side {
            TradeSide::Buy => {
                self.state.cash -= notional + fee;
                let pos = self
                    .state
                    .positions
                    .entry(intent.asset.clone())
                    .or_insert_with(|| Position {
                        asset: intent.asset.clone(),
                        quantity: Decimal::ZERO,
                        average_cost: Decimal::ZERO,
                    });
                let new_qty = pos.quantity + quantity;
                pos.average_cost = (pos.quantity * pos.average_cost + quantity * price) / new_qty;
                pos.quantity = new_qty;
                None
            }
            TradeSide::Sell => {
                self.state.cash += notional - fee;
                let mut realized = Decimal::ZERO;
                if let Some(pos) = self.state.positions.get_mut(&intent.asset) {
                    realized = (price - pos.average_cost) * quantity;
                    pos.quantity -= quantity;
                    if pos.quantity.is_zero() {
                        self.state.positions.remove(&intent.asset);
                    }
                }
                Some(realized)
            }
        };

        let record = TradeRecord {
            id: Uuid::new_v4(),
            asset: intent.asset.clone(),
            side: intent.side,
            quantity,
            price,
            notional,
            fee,
            realized_pnl,
            timestamp: now,
        };

        info!(
            trade = %record,
            cash = format!("${:.2}", self.state.cash),
            positions = self.state.positions.len(),
            "Trade executed"
        );

        self.state.trade_history.push(record.clone());
        record
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

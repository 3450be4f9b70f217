//! Portfolio summary and end-of-day performance report.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::budget::BudgetState;
use crate::portfolio::ledger::{PortfolioState, Valuation};
use crate::types::TradeRecord;

/// Trades listed under `key_actions` in a daily report.
const KEY_ACTIONS: usize = 5;

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub initial_cash: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub total_value: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_pct: Decimal,
    pub realized_pnl: Decimal,
    pub fees_paid: Decimal,
    pub trade_count: usize,
    pub stale: bool,
}

impl PortfolioSummary {
    pub fn build(state: &PortfolioState, valuation: &Valuation) -> Self {
        let total_pnl = valuation.total_value - state.initial_cash;
        Self {
            initial_cash: state.initial_cash,
            cash: state.cash,
            positions_value: valuation.total_value - state.cash,
            total_value: valuation.total_value,
            total_pnl,
            total_pnl_pct: pct_of(total_pnl, state.initial_cash),
            realized_pnl: state.trade_history.iter().filter_map(|t| t.realized_pnl).sum(),
            fees_paid: state.trade_history.iter().map(|t| t.fee).sum(),
            trade_count: state.trade_history.len(),
            stale: valuation.stale,
        }
    }
}

impl std::fmt::Display for PortfolioSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "value ${:.2} (cash ${:.2}, positions ${:.2}) pnl ${:+.2} ({:+.2}%)",
            self.total_value, self.cash, self.positions_value, self.total_pnl, self.total_pnl_pct,
        )?;
        if self.stale {
            write!(f, " [stale prices]")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Daily report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    pub asset: String,
    pub pnl_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub starting_value: Decimal,
    pub ending_value: Decimal,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_pct: Decimal,
    pub positions_count: usize,
    pub trades_count: usize,
    pub top_performer: Option<Performer>,
    pub worst_performer: Option<Performer>,
    /// Last few trades of the day, oldest first.
    pub key_actions: Vec<TradeRecord>,
    /// Budget usage for the closed day.
    pub budget: BudgetState,
}

impl DailyReport {
    /// Close out the day described by `budget` (its `day_start`).
    pub fn build(
        budget: BudgetState,
        starting_value: Decimal,
        state: &PortfolioState,
        valuation: &Valuation,
    ) -> Self {
        let date = budget.day_start.date_naive();
        let day_end: DateTime<Utc> = budget.day_start + chrono::Duration::days(1);
        let todays: Vec<&TradeRecord> = state
            .trade_history
            .iter()
            .filter(|t| t.timestamp >= budget.day_start && t.timestamp < day_end)
            .collect();

        let mut performers: Vec<Performer> = valuation
            .positions
            .iter()
            .map(|p| Performer {
                asset: p.asset.clone(),
                pnl_pct: pct_of(p.price - p.average_cost, p.average_cost),
            })
            .collect();
        performers.sort_by(|a, b| b.pnl_pct.cmp(&a.pnl_pct));

        let daily_pnl = valuation.total_value - starting_value;
        let total_pnl = valuation.total_value - state.initial_cash;

        let report = Self {
            date,
            starting_value,
            ending_value: valuation.total_value,
            daily_pnl,
            daily_pnl_pct: pct_of(daily_pnl, starting_value),
            total_pnl,
            total_pnl_pct: pct_of(total_pnl, state.initial_cash),
            positions_count: valuation.positions.len(),
            trades_count: todays.len(),
            top_performer: performers.first().cloned(),
            worst_performer: if performers.len() > 1 { performers.last().cloned() } else { None },
            key_actions: todays
                .iter()
                .skip(todays.len().saturating_sub(KEY_ACTIONS))
                .map(|t| (*t).clone())
                .collect(),
            budget,
        };

        info!(
            date = %report.date,
            value = format!("${:.2}", report.ending_value),
            daily_pnl = format!("${:+.2}", report.daily_pnl),
            trades = report.trades_count,
            analyses = report.budget.runs.analyses(),
            tokens = report.budget.consumed,
            "Daily report"
        );
        report
    }
}

fn pct_of(amount: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        Decimal::ZERO
    } else {
        (amount / base * Decimal::ONE_HUNDRED).round_dp(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortfolioConfig;
    use crate::engine::budget::BudgetLedger;
    use crate::portfolio::ledger::VirtualPortfolio;
    use crate::types::{TradeAmount, TradeIntent, TradeSide};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, h, 0, 0).unwrap()
    }

    fn prices(btc: Decimal, eth: Decimal) -> HashMap<String, Decimal> {
        [("BTCUSDT".to_string(), btc), ("ETHUSDT".to_string(), eth)].into()
    }

    fn buy(asset: &str, usd: Decimal) -> TradeIntent {
        TradeIntent {
            asset: asset.into(),
            side: TradeSide::Buy,
            amount: TradeAmount::Notional(usd),
            limit_price: None,
        }
    }

    #[test]
    fn test_summary_of_fresh_portfolio() {
        let p = VirtualPortfolio::new(PortfolioConfig::default());
        let summary = p.summary(&prices(dec!(100), dec!(10)));
        assert_eq!(summary.total_value, dec!(10000));
        assert_eq!(summary.total_pnl, Decimal::ZERO);
        assert_eq!(summary.trade_count, 0);
        assert!(!summary.stale);
    }

    #[test]
    fn test_summary_counts_fees() {
        let mut p = VirtualPortfolio::new(PortfolioConfig::default());
        p.apply_trade(&buy("BTCUSDT", dec!(1000)), &prices(dec!(100), dec!(10)), t(10)).unwrap();
        let summary = p.summary(&prices(dec!(100), dec!(10)));
        assert_eq!(summary.fees_paid, dec!(1));
        assert_eq!(summary.total_value, dec!(9999));
        assert_eq!(summary.positions_value, dec!(1000));
    }

    #[test]
    fn test_daily_report() {
        let mut p = VirtualPortfolio::new(PortfolioConfig::default());
        let open = prices(dec!(100), dec!(10));
        p.apply_trade(&buy("BTCUSDT", dec!(2000)), &open, t(9)).unwrap();
        p.apply_trade(&buy("ETHUSDT", dec!(1000)), &open, t(10)).unwrap();

        let close = prices(dec!(110), dec!(9));
        let valuation = p.valuation(&close);
        let budget = BudgetLedger::new(100_000, 0.8, t(0)).state().clone();
        let report = DailyReport::build(budget, dec!(10000), p.state(), &valuation);

        assert_eq!(report.date, t(0).date_naive());
        assert_eq!(report.trades_count, 2);
        assert_eq!(report.positions_count, 2);
        assert_eq!(report.top_performer.as_ref().map(|p| p.asset.as_str()), Some("BTCUSDT"));
        assert_eq!(report.worst_performer.as_ref().map(|p| p.pnl_pct), Some(dec!(-10)));
        // 7000 - 3 fees + 20 * 110 + 100 * 9
        assert_eq!(report.ending_value, dec!(10097));
        assert_eq!(report.daily_pnl, dec!(97));
        assert_eq!(report.key_actions.len(), 2);
    }
}

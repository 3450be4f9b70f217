//! Budget ledger: daily token cap tracking.
//!
//! Tracks consumption of the renewable daily analysis budget. Charges
//! are clamped at the cap so the remaining balance never goes negative,
//! and the ledger resets (without carry-over) when the UTC day changes.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{AnalysisTier, BudgetExceeded};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Per-day run counters, one per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub monitor: u32,
    pub quick: u32,
    pub medium: u32,
    pub full: u32,
}

impl TierCounts {
    pub fn record(&mut self, tier: AnalysisTier) {
        *self.slot(tier) += 1;
    }

    pub fn get(&self, tier: AnalysisTier) -> u32 {
        match tier {
            AnalysisTier::Monitor => self.monitor,
            AnalysisTier::Quick => self.quick,
            AnalysisTier::Medium => self.medium,
            AnalysisTier::Full => self.full,
        }
    }

    /// Runs that went through the gateway (everything but Monitor).
    pub fn analyses(&self) -> u32 {
        self.quick + self.medium + self.full
    }

    fn slot(&mut self, tier: AnalysisTier) -> &mut u32 {
        match tier {
            AnalysisTier::Monitor => &mut self.monitor,
            AnalysisTier::Quick => &mut self.quick,
            AnalysisTier::Medium => &mut self.medium,
            AnalysisTier::Full => &mut self.full,
        }
    }
}

/// Persistent budget state for the current day window.
///
/// Invariant: `consumed <= daily_cap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub daily_cap: u64,
    pub consumed: u64,
    /// UTC midnight of the current day window.
    pub day_start: DateTime<Utc>,
    /// Runs completed today, per tier.
    #[serde(default)]
    pub runs: TierCounts,
    /// Tokens reported by the gateway beyond the cap and dropped today.
    #[serde(default)]
    pub clamped_overage: u64,
    /// Whether the near-exhaustion warning has been emitted today.
    #[serde(default)]
    pub warned: bool,
}

/// Result of a `charge` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeOutcome {
    /// Tokens actually added to `consumed`.
    pub charged: u64,
    /// Tokens above the cap that were not recorded.
    pub clamped: u64,
}

/// Start of the UTC day containing `now`.
pub fn day_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct BudgetLedger {
    state: BudgetState,
    warning_fraction: f64,
}

impl BudgetLedger {
    /// Fresh ledger for the day containing `now`.
    pub fn new(daily_cap: u64, warning_fraction: f64, now: DateTime<Utc>) -> Self {
        Self {
            state: BudgetState {
                daily_cap,
                consumed: 0,
                day_start: day_floor(now),
                runs: TierCounts::default(),
                clamped_overage: 0,
                warned: false,
            },
            warning_fraction,
        }
    }

    /// Rebuild from a persisted snapshot, applying the configured cap.
    ///
    /// A cap lowered since the snapshot was taken clamps `consumed`, so a
    /// restart never reports more than the cap as spent.
    pub fn restore(mut state: BudgetState, daily_cap: u64, warning_fraction: f64) -> Self {
        if state.daily_cap != daily_cap {
            info!(old = state.daily_cap, new = daily_cap, "Daily token cap changed since last run");
            state.daily_cap = daily_cap;
        }
        if state.consumed > daily_cap {
            state.consumed = daily_cap;
        }
        Self {
            state,
            warning_fraction,
        }
    }

    pub fn state(&self) -> &BudgetState {
        &self.state
    }

    /// Tokens left in the current day window.
    pub fn remaining(&self) -> u64 {
        self.state.daily_cap - self.state.consumed
    }

    /// Tokens left as of `now`: a full cap if `now` is past the current window.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        if self.is_new_day(now) {
            self.state.daily_cap
        } else {
            self.remaining()
        }
    }

    /// Fraction of the daily cap spent (0.0–1.0).
    pub fn consumed_fraction(&self) -> f64 {
        if self.state.daily_cap == 0 {
            1.0
        } else {
            self.state.consumed as f64 / self.state.daily_cap as f64
        }
    }

    /// Whether consumption has reached the warning threshold.
    pub fn near_exhaustion(&self) -> bool {
        self.consumed_fraction() >= self.warning_fraction
    }

    /// Non-mutating check that `estimated_cost` fits the remaining budget.
    pub fn reserve(&self, estimated_cost: u64) -> Result<(), BudgetExceeded> {
        let remaining = self.remaining();
        if estimated_cost <= remaining {
            Ok(())
        } else {
            Err(BudgetExceeded {
                requested: estimated_cost,
                remaining,
            })
        }
    }

    /// Record actual consumption. Anything beyond the cap is clamped and logged.
    pub fn charge(&mut self, actual_cost: u64) -> ChargeOutcome {
        let remaining = self.remaining();
        let charged = actual_cost.min(remaining);
        let clamped = actual_cost - charged;
        self.state.consumed += charged;

        if clamped > 0 {
            self.state.clamped_overage += clamped;
            warn!(
                actual_cost,
                charged,
                clamped,
                daily_cap = self.state.daily_cap,
                "Gateway cost exceeded remaining budget; overage clamped"
            );
        }

        if !self.state.warned && self.near_exhaustion() {
            self.state.warned = true;
            warn!(
                consumed = self.state.consumed,
                daily_cap = self.state.daily_cap,
                pct = format!("{:.0}%", self.consumed_fraction() * 100.0),
                "Daily token budget nearly exhausted; upcoming analyses may be degraded"
            );
        }

        ChargeOutcome { charged, clamped }
    }

    /// Count a completed run for today's summary.
    pub fn record_run(&mut self, tier: AnalysisTier) {
        self.state.runs.record(tier);
    }

    /// Whether `now` falls in a later UTC day than the current window.
    pub fn is_new_day(&self, now: DateTime<Utc>) -> bool {
        now.date_naive() > self.state.day_start.date_naive()
    }

    /// Start a new day window. Leftover budget does not carry over.
    /// Returns the closed day's state.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> BudgetState {
        let closed = self.state.clone();
        self.state.consumed = 0;
        self.state.day_start = day_floor(now);
        self.state.runs = TierCounts::default();
        self.state.clamped_overage = 0;
        self.state.warned = false;

        info!(
            day = %self.state.day_start.date_naive(),
            previous_consumed = closed.consumed,
            previous_analyses = closed.runs.analyses(),
            "Daily token budget reset"
        );
        closed
    }

    /// Roll the day if `now` has crossed the boundary.
    pub fn roll_if_new_day(&mut self, now: DateTime<Utc>) -> Option<BudgetState> {
        if self.is_new_day(now) {
            Some(self.roll_day(now))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

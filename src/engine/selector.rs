//! Analysis level selector: the scheduler state machine.
//!
//! Each tier keeps its own `last_run`; a tier is due once
//! `last_run + interval × time_scale(now)` has passed. A tick picks the
//! highest-ranked due tier (or `Full` when a trigger escalates), then
//! degrades it until its nominal cost fits the remaining budget.
//!
//! Running a tier also satisfies every tier listed for it in
//! [`UPGRADE_TABLE`], so a `Full` run resets the timers of `Medium`,
//! `Quick` and `Monitor` in one step.
//!
//! A degraded run defers the requested tier for one interval of the tier
//! that actually ran, so an unaffordable `Full` is not re-requested (and
//! re-degraded) on every tick.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use tracing::{debug, info};

use crate::config::ScheduleConfig;
use crate::engine::budget::BudgetLedger;
use crate::types::AnalysisTier;

// ---------------------------------------------------------------------------
// Upgrade table
// ---------------------------------------------------------------------------

/// Tiers whose timers are reset when the key tier runs (besides itself).
pub const UPGRADE_TABLE: [(AnalysisTier, &[AnalysisTier]); 4] = [
    (AnalysisTier::Monitor, &[]),
    (AnalysisTier::Quick, &[AnalysisTier::Monitor]),
    (
        AnalysisTier::Medium,
        &[AnalysisTier::Quick, AnalysisTier::Monitor],
    ),
    (
        AnalysisTier::Full,
        &[AnalysisTier::Medium, AnalysisTier::Quick, AnalysisTier::Monitor],
    ),
];

/// Lower tiers satisfied by running `tier`.
pub fn upgrades(tier: AnalysisTier) -> &'static [AnalysisTier] {
    UPGRADE_TABLE[tier.rank()].1
}

// ---------------------------------------------------------------------------
// Selection result
// ---------------------------------------------------------------------------

/// Why a tier was requested before budget checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// A market trigger forced `Full`.
    Triggered,
    /// The tier's timer came due.
    Scheduled(AnalysisTier),
}

/// Final choice for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Nothing due; no bookkeeping needed.
    Idle,
    /// Run `tier`; `requested` differs from `tier` when the budget forced a degrade.
    Run {
        tier: AnalysisTier,
        requested: AnalysisTier,
        triggered: bool,
    },
}

impl Selection {
    pub fn tier(&self) -> Option<AnalysisTier> {
        match self {
            Selection::Idle => None,
            Selection::Run { tier, .. } => Some(*tier),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Selection::Run { tier, requested, .. } if tier != requested)
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

pub struct AnalysisSelector {
    config: ScheduleConfig,
    last_run: [Option<DateTime<Utc>>; 4],
    /// Earliest time a tier may be requested again after a degraded run.
    deferred_until: [Option<DateTime<Utc>>; 4],
}

impl AnalysisSelector {
    /// New selector with no run history: every tier is due.
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config,
            last_run: [None; 4],
            deferred_until: [None; 4],
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn last_run(&self, tier: AnalysisTier) -> Option<DateTime<Utc>> {
        self.last_run[tier.rank()]
    }

    /// Interval multiplier in effect at `now`.
    pub fn time_scale(&self, now: DateTime<Utc>) -> f64 {
        let mut scale = 1.0;
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            scale *= self.config.weekend_scale_factor;
        }
        let hour = now.hour();
        if hour < self.config.active_hours_start || hour >= self.config.active_hours_end {
            scale *= self.config.off_hours_scale_factor;
        }
        scale
    }

    /// Interval of `tier` scaled for `now`.
    pub fn scaled_interval(&self, tier: AnalysisTier, now: DateTime<Utc>) -> Duration {
        let base = self.config.interval(tier);
        let secs = (base.num_seconds() as f64 * self.time_scale(now)).round() as i64;
        Duration::seconds(secs)
    }

    /// When `tier` next comes due, or `None` if it has never run and is
    /// not deferred.
    pub fn next_due(&self, tier: AnalysisTier, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let timer = self
            .last_run(tier)
            .map(|last| last + self.scaled_interval(tier, now));
        match (timer, self.deferred_until[tier.rank()]) {
            (Some(t), Some(d)) => Some(t.max(d)),
            (t, d) => t.or(d),
        }
    }

    pub fn is_due(&self, tier: AnalysisTier, now: DateTime<Utc>) -> bool {
        self.next_due(tier, now).map_or(true, |due| due <= now)
    }

    /// Due tiers, highest rank first.
    pub fn due_tiers(&self, now: DateTime<Utc>) -> Vec<AnalysisTier> {
        AnalysisTier::ALL
            .iter()
            .rev()
            .copied()
            .filter(|t| self.is_due(*t, now))
            .collect()
    }

    /// What the timers and trigger ask for, before budget checks.
    pub fn request(&self, now: DateTime<Utc>, triggered: bool) -> Option<Request> {
        if triggered {
            return Some(Request::Triggered);
        }
        self.due_tiers(now).first().copied().map(Request::Scheduled)
    }

    /// Pick the tier for this tick, degrading to fit the budget.
    ///
    /// The requested tier degrades to the highest lower tier whose nominal
    /// cost fits, due or not. `Monitor` costs nothing and is the floor.
    pub fn select(&self, now: DateTime<Utc>, triggered: bool, budget: &BudgetLedger) -> Selection {
        let Some(request) = self.request(now, triggered) else {
            return Selection::Idle;
        };
        let requested = match request {
            Request::Triggered => AnalysisTier::Full,
            Request::Scheduled(tier) => tier,
        };

        let mut candidate = Some(requested);
        while let Some(tier) = candidate {
            match budget.reserve(tier.estimated_cost()) {
                Ok(()) => break,
                Err(e) => debug!(%tier, error = %e, "Tier does not fit budget"),
            }
            candidate = tier.lower();
        }
        let tier = candidate.unwrap_or(AnalysisTier::Monitor);

        if tier != requested {
            info!(
                requested = %requested,
                selected = %tier,
                remaining = budget.remaining(),
                "Analysis tier degraded to fit daily budget"
            );
        }

        Selection::Run {
            tier,
            requested,
            triggered,
        }
    }

    /// Mark `tier` and every tier it upgrades as run at `now`.
    pub fn mark_run(&mut self, tier: AnalysisTier, now: DateTime<Utc>) {
        self.last_run[tier.rank()] = Some(now);
        self.deferred_until[tier.rank()] = None;
        for lower in upgrades(tier) {
            self.last_run[lower.rank()] = Some(now);
            self.deferred_until[lower.rank()] = None;
        }
    }

    /// Record a degraded run: `ran` stood in for `requested`, which is held
    /// off for one interval of `ran`.
    pub fn mark_degraded(&mut self, requested: AnalysisTier, ran: AnalysisTier, now: DateTime<Utc>) {
        self.mark_run(ran, now);
        if requested > ran {
            let until = now + self.scaled_interval(ran, now);
            self.deferred_until[requested.rank()] = Some(until);
            debug!(%requested, %ran, until = %until, "Requested tier deferred after degraded run");
        }
    }

    /// Drop all deferrals, e.g. when a fresh daily budget arrives.
    pub fn clear_deferrals(&mut self) {
        self.deferred_until = [None; 4];
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

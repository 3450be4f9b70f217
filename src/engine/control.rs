//! Control loop: one tick of monitor → trigger → selector → gateway →
//! budget → portfolio.
//!
//! `ControlLoop` is the single owner of all mutable agent state. Budget
//! and portfolio change only after the gateway future has resolved, so
//! dropping a tick mid-call (shutdown, timeout) leaves them untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::engine::budget::{BudgetLedger, BudgetState, ChargeOutcome};
use crate::engine::monitor::MarketMonitor;
use crate::engine::selector::{AnalysisSelector, Selection};
use crate::engine::trigger::{TriggerDecision, TriggerEvaluator};
use crate::feed::FeedUpdate;
use crate::gateway::{AnalysisRequest, ExecutionGateway};
use crate::portfolio::{DailyReport, PortfolioSummary, PriceBook, Valuation, VirtualPortfolio};
use crate::storage::{Snapshot, SCHEMA_VERSION};
use crate::types::{AnalysisTier, GatewayError, MarketSignal, TradeRecord};

/// Daily reports kept in memory and in the snapshot.
const MAX_REPORTS: usize = 30;

/// Trades included in a published view.
const RECENT_TRADES: usize = 50;

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No tier was due.
    Idle,
    /// Monitor-only bookkeeping; no gateway call.
    Monitored {
        requested: AnalysisTier,
        triggered: bool,
    },
    Analyzed {
        tier: AnalysisTier,
        requested: AnalysisTier,
        triggered: bool,
        charge: ChargeOutcome,
        executed: usize,
        rejected: usize,
    },
    /// Gateway failed or timed out; nothing was charged or advanced.
    GatewayFailed {
        tier: AnalysisTier,
        error: GatewayError,
    },
    /// A gateway tier was due but no price has been seen yet; retried
    /// next tick.
    AwaitingPrices { tier: AnalysisTier },
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub signal: MarketSignal,
    pub trigger: TriggerDecision,
    pub outcome: TickOutcome,
    /// Set on the first tick of a new UTC day.
    pub daily_report: Option<DailyReport>,
    pub budget_remaining: u64,
}

// ---------------------------------------------------------------------------
// Published view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TierSchedule {
    pub tier: AnalysisTier,
    pub last_run: Option<DateTime<Utc>>,
    pub next_due: Option<DateTime<Utc>>,
    pub due: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub at: DateTime<Utc>,
    pub ticks: u64,
    pub budget: BudgetState,
    pub budget_remaining: u64,
    pub near_exhaustion: bool,
    pub time_scale: f64,
    pub schedule: Vec<TierSchedule>,
    pub last_signal: Option<MarketSignal>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Consistent point-in-time copy of everything readers may look at.
#[derive(Debug, Clone, Serialize)]
pub struct LoopView {
    pub status: StatusView,
    pub valuation: Valuation,
    pub summary: PortfolioSummary,
    pub recent_trades: Vec<TradeRecord>,
    pub reports: Vec<DailyReport>,
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

pub struct ControlLoop {
    monitor: MarketMonitor,
    trigger: TriggerEvaluator,
    selector: AnalysisSelector,
    budget: BudgetLedger,
    portfolio: VirtualPortfolio,
    prices: PriceBook,
    reports: Vec<DailyReport>,
    day_open_value: Decimal,
    gateway_timeout: Duration,
    ticks: u64,
}

impl ControlLoop {
    /// Fresh state at `now`.
    pub fn new(config: &AppConfig, now: DateTime<Utc>) -> Self {
        let portfolio = VirtualPortfolio::new(config.portfolio.clone());
        Self {
            monitor: MarketMonitor::new(config.monitor.window_size),
            trigger: TriggerEvaluator::new(config.triggers.clone()),
            selector: AnalysisSelector::new(config.schedule.clone()),
            budget: BudgetLedger::new(
                config.schedule.daily_token_cap,
                config.schedule.budget_warning_fraction,
                now,
            ),
            day_open_value: portfolio.cash(),
            portfolio,
            prices: PriceBook::new(),
            reports: Vec::new(),
            gateway_timeout: Duration::from_secs(config.gateway.timeout_secs),
            ticks: 0,
        }
    }

    /// Resume from a snapshot. Scheduler timers start empty, so every
    /// tier is due on the first tick.
    pub fn restore(config: &AppConfig, snapshot: Snapshot) -> Self {
        let portfolio = VirtualPortfolio::restore(snapshot.portfolio, config.portfolio.clone());
        let day_open_value = snapshot.day_open_value.unwrap_or_else(|| portfolio.cash());
        Self {
            monitor: MarketMonitor::new(config.monitor.window_size),
            trigger: TriggerEvaluator::restore(config.triggers.clone(), snapshot.last_triggered_at),
            selector: AnalysisSelector::new(config.schedule.clone()),
            budget: BudgetLedger::restore(
                snapshot.budget,
                config.schedule.daily_token_cap,
                config.schedule.budget_warning_fraction,
            ),
            portfolio,
            prices: PriceBook::new(),
            reports: snapshot.reports,
            day_open_value,
            gateway_timeout: Duration::from_secs(config.gateway.timeout_secs),
            ticks: 0,
        }
    }

    /// Override the gateway timeout.
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn budget(&self) -> &BudgetLedger {
        &self.budget
    }

    pub fn portfolio(&self) -> &VirtualPortfolio {
        &self.portfolio
    }

    pub fn selector(&self) -> &AnalysisSelector {
        &self.selector
    }

    pub fn trigger(&self) -> &TriggerEvaluator {
        &self.trigger
    }

    pub fn prices(&self) -> &PriceBook {
        &self.prices
    }

    pub fn reports(&self) -> &[DailyReport] {
        &self.reports
    }

    /// Feed one sampler result into the monitor and price book.
    pub fn ingest(&mut self, update: FeedUpdate) {
        match update {
            FeedUpdate::Quote(quote) => {
                self.monitor.record(&quote);
                self.prices.update(&quote);
            }
            FeedUpdate::Unavailable(e) => self.prices.mark_stale(&e.asset),
        }
    }

    /// Ingest everything queued by the sampler without waiting.
    pub fn drain(&mut self, rx: &mut mpsc::Receiver<FeedUpdate>) -> usize {
        let mut count = 0;
        while let Ok(update) = rx.try_recv() {
            self.ingest(update);
            count += 1;
        }
        count
    }

    /// Run one tick at `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>, gateway: &dyn ExecutionGateway) -> TickReport {
        self.ticks += 1;
        let daily_report = self.roll_day(now);

        let signal = self.monitor.sample(now);
        let decision = self.trigger.evaluate(&signal, now);
        let selection = self.selector.select(now, decision.escalates(), &self.budget);

        if selection.is_degraded() && self.budget.near_exhaustion() {
            warn!(
                consumed = self.budget.state().consumed,
                daily_cap = self.budget.state().daily_cap,
                "Analysis degraded: daily token budget nearly exhausted"
            );
        }

        let outcome = match selection {
            Selection::Idle => TickOutcome::Idle,
            Selection::Run { tier, .. } if tier.invokes_gateway() && self.prices.is_empty() => {
                warn!(%tier, "No prices received yet; holding off analysis");
                TickOutcome::AwaitingPrices { tier }
            }
            Selection::Run {
                tier: AnalysisTier::Monitor,
                requested,
                triggered,
            } => {
                self.selector.mark_degraded(requested, AnalysisTier::Monitor, now);
                self.budget.record_run(AnalysisTier::Monitor);
                TickOutcome::Monitored {
                    requested,
                    triggered,
                }
            }
            Selection::Run {
                tier,
                requested,
                triggered,
            } => self.run_analysis(now, tier, requested, triggered, &signal, gateway).await,
        };

        TickReport {
            tick: self.ticks,
            at: now,
            signal,
            trigger: decision,
            outcome,
            daily_report,
            budget_remaining: self.budget.remaining(),
        }
    }

    async fn run_analysis(
        &mut self,
        now: DateTime<Utc>,
        tier: AnalysisTier,
        requested: AnalysisTier,
        triggered: bool,
        signal: &MarketSignal,
        gateway: &dyn ExecutionGateway,
    ) -> TickOutcome {
        let request = AnalysisRequest {
            tier,
            triggered,
            signal: signal.clone(),
            portfolio: self.portfolio.summary(&self.prices),
            budget_remaining: self.budget.remaining(),
        };

        debug!(gateway = gateway.name(), %tier, triggered, "Requesting analysis");
        let result = match tokio::time::timeout(self.gateway_timeout, gateway.run_analysis(&request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.gateway_timeout.as_secs())),
        };

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    gateway = gateway.name(),
                    %tier,
                    error = %error,
                    "Gateway call failed; no budget charged, retrying next tick"
                );
                return TickOutcome::GatewayFailed { tier, error };
            }
        };

        let charge = self.budget.charge(response.resource_cost);
        self.selector.mark_degraded(requested, tier, now);
        self.budget.record_run(tier);
        if triggered {
            self.trigger.record_triggered_run(now);
        }

        let batch = self
            .portfolio
            .apply_batch(&response.trade_intents, &self.prices, now);

        info!(
            %tier,
            requested = %requested,
            triggered,
            cost = charge.charged,
            remaining = self.budget.remaining(),
            executed = batch.executed.len(),
            rejected = batch.rejected.len(),
            "Analysis complete"
        );
        debug!(rationale = %response.rationale, "Gateway rationale");

        TickOutcome::Analyzed {
            tier,
            requested,
            triggered,
            charge,
            executed: batch.executed.len(),
            rejected: batch.rejected.len(),
        }
    }

    fn roll_day(&mut self, now: DateTime<Utc>) -> Option<DailyReport> {
        let closed = self.budget.roll_if_new_day(now)?;
        self.selector.clear_deferrals();
        let valuation = self.portfolio.valuation(&self.prices);
        let report = DailyReport::build(closed, self.day_open_value, self.portfolio.state(), &valuation);

        self.day_open_value = valuation.total_value;
        self.reports.push(report.clone());
        if self.reports.len() > MAX_REPORTS {
            let excess = self.reports.len() - MAX_REPORTS;
            self.reports.drain(..excess);
        }
        Some(report)
    }

    /// Persistable state.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: now,
            budget: self.budget.state().clone(),
            portfolio: self.portfolio.state().clone(),
            reports: self.reports.clone(),
            day_open_value: Some(self.day_open_value),
            last_triggered_at: self.trigger.last_triggered_at(),
        }
    }

    /// Read-only view for reporting.
    pub fn view(&self, now: DateTime<Utc>) -> LoopView {
        let schedule = AnalysisTier::ALL
            .iter()
            .map(|&tier| TierSchedule {
                tier,
                last_run: self.selector.last_run(tier),
                next_due: self.selector.next_due(tier, now),
                due: self.selector.is_due(tier, now),
            })
            .collect();

        let valuation = self.portfolio.valuation(&self.prices);
        let summary = PortfolioSummary::build(self.portfolio.state(), &valuation);
        let history = &self.portfolio.state().trade_history;

        LoopView {
            status: StatusView {
                at: now,
                ticks: self.ticks,
                budget: self.budget.state().clone(),
                budget_remaining: self.budget.remaining_at(now),
                near_exhaustion: self.budget.near_exhaustion(),
                time_scale: self.selector.time_scale(now),
                schedule,
                last_signal: self.monitor.last_signal().cloned(),
                last_triggered_at: self.trigger.last_triggered_at(),
            },
            valuation,
            summary,
            recent_trades: history
                .iter()
                .skip(history.len().saturating_sub(RECENT_TRADES))
                .cloned()
                .collect(),
            reports: self.reports.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

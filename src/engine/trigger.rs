//! Trigger evaluator.
//!
//! Decides from the latest market signal whether the scheduler should
//! force a `Full` analysis out of schedule. The threshold check is a pure
//! function; the only state kept is the time of the last triggered run,
//! which enforces a cooldown between forced escalations.
//!
//! The cooldown is wall-clock and is not stretched by the weekend or
//! off-hours interval scaling.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::TriggerConfig;
use crate::types::MarketSignal;

/// Which threshold a signal crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Volatility,
    VolumeSurge,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerReason::Volatility => write!(f, "volatility"),
            TriggerReason::VolumeSurge => write!(f, "volume surge"),
        }
    }
}

/// Outcome of evaluating one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// No threshold crossed.
    Quiet,
    /// A threshold was crossed but the cooldown has not elapsed.
    Suppressed {
        reason: TriggerReason,
        cooldown_remaining: chrono::Duration,
    },
    /// Escalate to `Full` now.
    Escalate { reason: TriggerReason },
}

impl TriggerDecision {
    pub fn escalates(&self) -> bool {
        matches!(self, TriggerDecision::Escalate { .. })
    }
}

/// Pure threshold check: which rule (if any) the signal fires.
pub fn check_thresholds(signal: &MarketSignal, config: &TriggerConfig) -> Option<TriggerReason> {
    if signal.volatility_pct >= config.volatility_trigger_pct {
        Some(TriggerReason::Volatility)
    } else if signal.volume_surge_pct >= config.volume_surge_trigger_pct {
        Some(TriggerReason::VolumeSurge)
    } else {
        None
    }
}

pub struct TriggerEvaluator {
    config: TriggerConfig,
    last_triggered_at: Option<DateTime<Utc>>,
}

impl TriggerEvaluator {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            last_triggered_at: None,
        }
    }

    /// Resume with the cooldown carried over from a snapshot.
    pub fn restore(config: TriggerConfig, last_triggered_at: Option<DateTime<Utc>>) -> Self {
        Self {
            config,
            last_triggered_at,
        }
    }

    pub fn last_triggered_at(&self) -> Option<DateTime<Utc>> {
        self.last_triggered_at
    }

    /// Evaluate a signal at `now` without changing state.
    pub fn evaluate(&self, signal: &MarketSignal, now: DateTime<Utc>) -> TriggerDecision {
        let Some(reason) = check_thresholds(signal, &self.config) else {
            return TriggerDecision::Quiet;
        };

        if let Some(last) = self.last_triggered_at {
            let elapsed = now - last;
            let cooldown = self.config.cooldown();
            if elapsed < cooldown {
                debug!(
                    %reason,
                    remaining_secs = (cooldown - elapsed).num_seconds(),
                    "Trigger suppressed by cooldown"
                );
                return TriggerDecision::Suppressed {
                    reason,
                    cooldown_remaining: cooldown - elapsed,
                };
            }
        }

        info!(
            %reason,
            volatility_pct = format!("{:.2}", signal.volatility_pct),
            volume_surge_pct = format!("{:.2}", signal.volume_surge_pct),
            asset = signal.asset.as_deref().unwrap_or("-"),
            "Market trigger fired; escalating to full analysis"
        );
        TriggerDecision::Escalate { reason }
    }

    /// Stamp a completed trigger-forced run; starts the cooldown.
    pub fn record_triggered_run(&mut self, now: DateTime<Utc>) {
        self.last_triggered_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, h, m, 0).unwrap()
    }

    fn signal(volatility: f64, volume: f64) -> MarketSignal {
        MarketSignal {
            volatility_pct: volatility,
            volume_surge_pct: volume,
            price_change_pct: volatility,
            asset: Some("BTCUSDT".into()),
            sampled_at: at(12, 0),
        }
    }

    #[test]
    fn test_thresholds_inclusive() {
        let cfg = TriggerConfig::default();
        assert_eq!(check_thresholds(&signal(5.0, 0.0), &cfg), Some(TriggerReason::Volatility));
        assert_eq!(check_thresholds(&signal(4.99, 0.0), &cfg), None);
        assert_eq!(check_thresholds(&signal(0.0, 30.0), &cfg), Some(TriggerReason::VolumeSurge));
    }

    #[test]
    fn test_volume_drop_does_not_fire() {
        let cfg = TriggerConfig::default();
        assert_eq!(check_thresholds(&signal(0.0, -80.0), &cfg), None);
    }

    #[test]
    fn test_quiet_signal() {
        let eval = TriggerEvaluator::new(TriggerConfig::default());
        assert_eq!(eval.evaluate(&signal(1.0, 5.0), at(12, 0)), TriggerDecision::Quiet);
    }

    #[test]
    fn test_cooldown_suppresses_second_spike() {
        let mut eval = TriggerEvaluator::new(TriggerConfig::default());
        assert!(eval.evaluate(&signal(8.0, 0.0), at(12, 0)).escalates());
        eval.record_triggered_run(at(12, 0));

        match eval.evaluate(&signal(9.0, 0.0), at(12, 1)) {
            TriggerDecision::Suppressed { cooldown_remaining, .. } => {
                assert_eq!(cooldown_remaining, Duration::minutes(29));
            }
            other => panic!("expected suppression, got {other:?}"),
        }
    }

    #[test]
    fn test_escalates_again_after_cooldown() {
        let mut eval = TriggerEvaluator::new(TriggerConfig::default());
        eval.record_triggered_run(at(12, 0));
        assert!(!eval.evaluate(&signal(8.0, 0.0), at(12, 29)).escalates());
        assert!(eval.evaluate(&signal(8.0, 0.0), at(12, 30)).escalates());
    }

    #[test]
    fn test_unrecorded_escalation_does_not_start_cooldown() {
        let eval = TriggerEvaluator::new(TriggerConfig::default());
        assert!(eval.evaluate(&signal(8.0, 0.0), at(12, 0)).escalates());
        assert!(eval.evaluate(&signal(8.0, 0.0), at(12, 1)).escalates());
        assert!(eval.last_triggered_at().is_none());
    }

    #[test]
    fn test_zero_cooldown() {
        let mut eval = TriggerEvaluator::new(TriggerConfig {
            trigger_cooldown_mins: 0,
            ..TriggerConfig::default()
        });
        eval.record_triggered_run(at(12, 0));
        assert!(eval.evaluate(&signal(8.0, 0.0), at(12, 0)).escalates());
    }

    #[test]
    fn test_cooldown_ignores_weekend_and_off_hours() {
        // Saturday 23:00: both scaling factors apply to tier intervals.
        let sat_night = Utc.with_ymd_and_hms(2025, 3, 15, 23, 0, 0).unwrap();
        let mut eval = TriggerEvaluator::new(TriggerConfig::default());
        eval.record_triggered_run(sat_night);
        assert!(!eval.evaluate(&signal(8.0, 0.0), sat_night + Duration::minutes(29)).escalates());
        assert!(eval.evaluate(&signal(8.0, 0.0), sat_night + Duration::minutes(30)).escalates());
    }
}

//! Configuration loading from TOML with bounds validation.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every option has a default, unknown keys are rejected, and
//! out-of-range values fail `validate()` so the agent refuses to start
//! instead of misbehaving later. Secrets are referenced by env-var name
//! and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::types::{AnalysisTier, ConfigError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub schedule: ScheduleConfig,
    pub triggers: TriggerConfig,
    pub portfolio: PortfolioConfig,
    pub monitor: MonitorConfig,
    pub gateway: GatewayConfig,
    pub feed: FeedConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    pub state_file: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "VIGIL-001".to_string(),
            tick_interval_secs: 60,
            state_file: "vigil_state.json".to_string(),
        }
    }
}

/// Tier cadence, time scaling and the daily token cap.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub daily_token_cap: u64,
    pub monitor_interval_mins: u32,
    pub quick_interval_mins: u32,
    pub medium_interval_mins: u32,
    pub full_interval_mins: u32,
    /// Interval multiplier on Saturdays and Sundays (UTC).
    pub weekend_scale_factor: f64,
    /// Interval multiplier outside the active-hours window.
    pub off_hours_scale_factor: f64,
    /// First active UTC hour (inclusive).
    pub active_hours_start: u32,
    /// Last active UTC hour (exclusive).
    pub active_hours_end: u32,
    /// Fraction of the daily cap at which a near-exhaustion warning is logged.
    pub budget_warning_fraction: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_token_cap: 100_000,
            monitor_interval_mins: 5,
            quick_interval_mins: 60,
            medium_interval_mins: 240,
            full_interval_mins: 720,
            weekend_scale_factor: 1.5,
            off_hours_scale_factor: 1.5,
            active_hours_start: 6,
            active_hours_end: 22,
            budget_warning_fraction: 0.8,
        }
    }
}

impl ScheduleConfig {
    /// Unscaled cadence of a tier.
    pub fn interval(&self, tier: AnalysisTier) -> chrono::Duration {
        let mins = match tier {
            AnalysisTier::Monitor => self.monitor_interval_mins,
            AnalysisTier::Quick => self.quick_interval_mins,
            AnalysisTier::Medium => self.medium_interval_mins,
            AnalysisTier::Full => self.full_interval_mins,
        };
        chrono::Duration::minutes(i64::from(mins))
    }
}

/// Market-driven escalation thresholds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerConfig {
    pub volatility_trigger_pct: f64,
    pub volume_surge_trigger_pct: f64,
    pub trigger_cooldown_mins: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            volatility_trigger_pct: 5.0,
            volume_surge_trigger_pct: 30.0,
            trigger_cooldown_mins: 30,
        }
    }
}

impl TriggerConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.trigger_cooldown_mins))
    }
}

/// Virtual portfolio rules.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PortfolioConfig {
    pub initial_cash: Decimal,
    pub max_positions: usize,
    pub max_allocation_fraction: Decimal,
    pub min_position_usd: Decimal,
    pub fee_rate: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(10000),
            max_positions: 5,
            max_allocation_fraction: dec!(0.30),
            min_position_usd: dec!(10),
            fee_rate: dec!(0.001),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Symbols sampled by the monitor and priced by the ledger.
    pub assets: Vec<String>,
    /// Samples kept per asset.
    pub window_size: usize,
    pub sample_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            assets: ["BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            window_size: 12,
            sample_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP endpoint of the analysis service. `None` runs the dry-run gateway.
    pub endpoint: Option<String>,
    /// Name of the env var holding the bearer token.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: "VIGIL_GATEWAY_KEY".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 3030,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            info!(path, "No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Check every option against its bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.schedule;
        if s.daily_token_cap < AnalysisTier::Quick.estimated_cost() {
            return Err(ConfigError::new(
                "schedule.daily_token_cap",
                s.daily_token_cap,
                "must cover at least one quick analysis",
            ));
        }
        let intervals = [
            ("schedule.monitor_interval_mins", s.monitor_interval_mins),
            ("schedule.quick_interval_mins", s.quick_interval_mins),
            ("schedule.medium_interval_mins", s.medium_interval_mins),
            ("schedule.full_interval_mins", s.full_interval_mins),
        ];
        for (field, mins) in intervals {
            if mins == 0 {
                return Err(ConfigError::new(field, mins, "must be at least 1 minute"));
            }
        }
        for pair in intervals.windows(2) {
            if pair[1].1 < pair[0].1 {
                return Err(ConfigError::new(
                    pair[1].0,
                    pair[1].1,
                    "must not be shorter than the interval of a lower tier",
                ));
            }
        }
        check_range("schedule.weekend_scale_factor", s.weekend_scale_factor, 1.0, 10.0)?;
        check_range("schedule.off_hours_scale_factor", s.off_hours_scale_factor, 1.0, 10.0)?;
        if s.active_hours_start > 23 {
            return Err(ConfigError::new("schedule.active_hours_start", s.active_hours_start, "must be 0..=23"));
        }
        if s.active_hours_end > 23 || s.active_hours_end <= s.active_hours_start {
            return Err(ConfigError::new(
                "schedule.active_hours_end",
                s.active_hours_end,
                "must be 0..=23 and after active_hours_start",
            ));
        }
        if !(s.budget_warning_fraction > 0.0 && s.budget_warning_fraction <= 1.0) {
            return Err(ConfigError::new(
                "schedule.budget_warning_fraction",
                s.budget_warning_fraction,
                "must be within (0, 1]",
            ));
        }

        let t = &self.triggers;
        if !(t.volatility_trigger_pct > 0.0 && t.volatility_trigger_pct.is_finite()) {
            return Err(ConfigError::new("triggers.volatility_trigger_pct", t.volatility_trigger_pct, "must be positive"));
        }
        if !(t.volume_surge_trigger_pct > 0.0 && t.volume_surge_trigger_pct.is_finite()) {
            return Err(ConfigError::new("triggers.volume_surge_trigger_pct", t.volume_surge_trigger_pct, "must be positive"));
        }
        if t.trigger_cooldown_mins > 1440 {
            return Err(ConfigError::new("triggers.trigger_cooldown_mins", t.trigger_cooldown_mins, "must be at most one day"));
        }

        let p = &self.portfolio;
        if p.initial_cash <= Decimal::ZERO {
            return Err(ConfigError::new("portfolio.initial_cash", p.initial_cash, "must be positive"));
        }
        if !(1..=10).contains(&p.max_positions) {
            return Err(ConfigError::new("portfolio.max_positions", p.max_positions, "must be within 1..=10"));
        }
        if p.max_allocation_fraction < dec!(0.05) || p.max_allocation_fraction > dec!(0.5) {
            return Err(ConfigError::new(
                "portfolio.max_allocation_fraction",
                p.max_allocation_fraction,
                "must be within 0.05..=0.5",
            ));
        }
        if p.min_position_usd < Decimal::ZERO {
            return Err(ConfigError::new("portfolio.min_position_usd", p.min_position_usd, "must not be negative"));
        }
        if p.fee_rate < Decimal::ZERO || p.fee_rate > dec!(0.05) {
            return Err(ConfigError::new("portfolio.fee_rate", p.fee_rate, "must be within 0..=0.05"));
        }

        let m = &self.monitor;
        if m.assets.is_empty() || m.assets.iter().any(|a| a.trim().is_empty()) {
            return Err(ConfigError::new("monitor.assets", format!("{:?}", m.assets), "must list at least one symbol"));
        }
        if !(2..=1000).contains(&m.window_size) {
            return Err(ConfigError::new("monitor.window_size", m.window_size, "must be within 2..=1000"));
        }
        if m.sample_interval_secs == 0 {
            return Err(ConfigError::new("monitor.sample_interval_secs", 0, "must be at least 1"));
        }

        if self.agent.tick_interval_secs == 0 {
            return Err(ConfigError::new("agent.tick_interval_secs", 0, "must be at least 1"));
        }
        if self.agent.state_file.trim().is_empty() {
            return Err(ConfigError::new("agent.state_file", "\"\"", "must not be empty"));
        }

        if let Some(endpoint) = &self.gateway.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::new("gateway.endpoint", endpoint, "must be an http(s) URL"));
            }
        }
        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::new("gateway.timeout_secs", 0, "must be at least 1"));
        }
        if self.feed.timeout_secs == 0 {
            return Err(ConfigError::new("feed.timeout_secs", 0, "must be at least 1"));
        }

        Ok(())
    }
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::new(field, value, &format!("must be within {min}..={max}")))
    }
}

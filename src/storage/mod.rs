//! Persistence layer.
//!
//! Saves and loads a versioned JSON snapshot of the budget, portfolio and
//! daily reports. Writes go to a sibling temp file that is renamed over
//! the target, so a crash mid-write leaves the previous snapshot intact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::budget::BudgetState;
use crate::portfolio::{DailyReport, PortfolioState};

/// Current snapshot schema. Bump on incompatible changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub budget: BudgetState,
    pub portfolio: PortfolioState,
    #[serde(default)]
    pub reports: Vec<DailyReport>,
    /// Portfolio value when the current day opened.
    #[serde(default)]
    pub day_open_value: Option<Decimal>,
    /// Keeps the trigger cooldown across restarts.
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Save a snapshot atomically.
pub fn save_snapshot(snapshot: &Snapshot, path: &str) -> Result<()> {
    let target = Path::new(path);
    let tmp = temp_path_for(target);
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialise snapshot")?;

    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write snapshot to {}", tmp.display()))?;
    std::fs::rename(&tmp, target)
        .with_context(|| format!("Failed to move snapshot into place at {path}"))?;

    debug!(
        path,
        consumed = snapshot.budget.consumed,
        cash = %snapshot.portfolio.cash,
        "Snapshot saved"
    );
    Ok(())
}

/// Load a snapshot. `None` if the file doesn't exist (fresh start).
///
/// Snapshots written by a newer schema are refused rather than guessed at.
pub fn load_snapshot(path: &str) -> Result<Option<Snapshot>> {
    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read snapshot from {path}"))?;

    let header: serde_json::Value =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse snapshot from {path}"))?;
    let version = header
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .with_context(|| format!("Snapshot {path} has no schema_version"))?;
    if version > u64::from(SCHEMA_VERSION) {
        anyhow::bail!(
            "Snapshot {path} has schema version {version}, this build understands up to {SCHEMA_VERSION}"
        );
    }

    let snapshot: Snapshot = serde_json::from_value(header)
        .with_context(|| format!("Failed to decode snapshot from {path}"))?;

    info!(
        path,
        saved_at = %snapshot.saved_at,
        consumed = snapshot.budget.consumed,
        cash = %snapshot.portfolio.cash,
        positions = snapshot.portfolio.positions.len(),
        trades = snapshot.portfolio.trade_history.len(),
        "State loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the snapshot (for `--reset`).
pub fn delete_snapshot(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to delete snapshot {path}"))?;
        info!(path, "Snapshot deleted");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! VIGIL: budget-aware analysis scheduler with a virtual portfolio ledger.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or creates fresh), starts the price sampler
//! and runs the tick loop with graceful shutdown.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use vigil::config;
use vigil::dashboard::{self, DashboardState};
use vigil::engine::{ControlLoop, TickOutcome, TickReport};
use vigil::feed::{self, BinanceFeed, PriceFeed};
use vigil::gateway::{DryRunGateway, ExecutionGateway, HttpGateway};
use vigil::storage;

const BANNER: &str = r#"
 __      _______ _____ _____ _
 \ \    / /_   _/ ____|_   _| |
  \ \  / /  | || |  __  | | | |
   \ \/ /   | || | |_ | | | | |
    \  /   _| || |__| |_| |_| |____
     \/   |_____\_____|_____|______|

  Budget-aware analysis scheduler
  v0.1.0
"#;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let reset = args.iter().any(|a| a == "--reset");
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or(CONFIG_PATH);

    // Invalid configuration is fatal
    let cfg = config::AppConfig::load_or_default(config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        tick_interval_secs = cfg.agent.tick_interval_secs,
        daily_token_cap = cfg.schedule.daily_token_cap,
        initial_cash = %cfg.portfolio.initial_cash,
        assets = cfg.monitor.assets.len(),
        "VIGIL starting up"
    );

    // -- Restore or create state -----------------------------------------

    let state_file = cfg.agent.state_file.clone();
    if reset {
        warn!(path = %state_file, "--reset given, discarding saved state");
        storage::delete_snapshot(&state_file)?;
    }

    let mut control = match storage::load_snapshot(&state_file)? {
        Some(snapshot) => {
            info!(
                consumed = snapshot.budget.consumed,
                cash = %snapshot.portfolio.cash,
                positions = snapshot.portfolio.positions.len(),
                "Resumed from saved state"
            );
            ControlLoop::restore(&cfg, snapshot)
        }
        None => {
            info!(cash = %cfg.portfolio.initial_cash, "Fresh start");
            ControlLoop::new(&cfg, Utc::now())
        }
    };

    // -- Initialise components -------------------------------------------

    let gateway: Box<dyn ExecutionGateway> = match HttpGateway::from_config(&cfg.gateway)? {
        Some(gw) => {
            info!(endpoint = ?cfg.gateway.endpoint, "Using HTTP execution gateway");
            Box::new(gw)
        }
        None => {
            warn!("No gateway endpoint configured; running in dry-run mode");
            Box::new(DryRunGateway::new())
        }
    };

    let price_feed: Arc<dyn PriceFeed> = Arc::new(BinanceFeed::new(&cfg.feed)?);
    let (feed_tx, mut feed_rx) = mpsc::channel(cfg.monitor.assets.len().max(1) * 16);
    let sampler = feed::spawn_sampler(
        price_feed,
        cfg.monitor.assets.clone(),
        Duration::from_secs(cfg.monitor.sample_interval_secs),
        feed_tx,
    );

    // One sampler round before the first tick, so the start-up analysis
    // sees real prices.
    let warmup = Duration::from_secs(cfg.feed.timeout_secs + 5);
    match tokio::time::timeout(warmup, feed_rx.recv()).await {
        Ok(Some(update)) => control.ingest(update),
        Ok(None) => warn!("Price sampler exited before the first quote"),
        Err(_) => warn!(secs = warmup.as_secs(), "No price during warm-up; analysis waits for the feed"),
    }

    let dashboard_state = Arc::new(DashboardState::new(cfg.agent.name.clone()));
    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(dashboard_state.clone(), cfg.dashboard.port);
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.tick_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.tick_interval_secs,
        gateway = gateway.name(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                control.drain(&mut feed_rx);
                let now = Utc::now();

                // A Ctrl+C during a gateway call drops the tick before any
                // budget or portfolio change.
                let report = tokio::select! {
                    report = control.tick(now, gateway.as_ref()) => report,
                    _ = &mut shutdown => {
                        info!("Shutdown signal received during tick; pending analysis cancelled.");
                        break;
                    }
                };
                log_tick_report(&report);

                if let Err(e) = storage::save_snapshot(&control.snapshot(now), &state_file) {
                    error!(error = %e, "Failed to save state");
                }
                dashboard_state.publish(control.view(now)).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    sampler.abort();

    // Save final state
    let now = Utc::now();
    storage::save_snapshot(&control.snapshot(now), &state_file)?;
    let summary = control.portfolio().summary(control.prices());
    info!(
        value = format!("${:.2}", summary.total_value),
        pnl = format!("${:+.2}", summary.total_pnl),
        trades = summary.trade_count,
        tokens_today = control.budget().state().consumed,
        "VIGIL shut down cleanly."
    );

    Ok(())
}

/// Log a human-readable tick summary.
fn log_tick_report(report: &TickReport) {
    if let Some(daily) = &report.daily_report {
        info!(
            date = %daily.date,
            pnl = format!("${:+.2} ({:+.2}%)", daily.daily_pnl, daily.daily_pnl_pct),
            trades = daily.trades_count,
            "Day closed"
        );
    }

    match &report.outcome {
        TickOutcome::Idle | TickOutcome::AwaitingPrices { .. } => {}
        TickOutcome::Monitored { requested, .. } => info!(
            tick = report.tick,
            requested = %requested,
            signal = %report.signal,
            "Tick complete (monitor only)"
        ),
        TickOutcome::Analyzed {
            tier,
            executed,
            rejected,
            charge,
            ..
        } => info!(
            tick = report.tick,
            tier = %tier,
            tokens = charge.charged,
            remaining = report.budget_remaining,
            executed,
            rejected,
            "Tick complete"
        ),
        TickOutcome::GatewayFailed { tier, error } => warn!(
            tick = report.tick,
            tier = %tier,
            error = %error,
            "Tick skipped: gateway failure"
        ),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vigil=info"));

    let json_logging = std::env::var("VIGIL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

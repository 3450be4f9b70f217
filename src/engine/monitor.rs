//! Market condition monitor.
//!
//! Keeps a rolling window of recent price/volume samples per tracked
//! asset and turns them into a `MarketSignal` by comparing the latest
//! sample with the mean of the samples before it. Pure in-memory work:
//! quotes are pushed in by the feed sampler, so `sample()` never waits
//! on the network.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::types::{MarketSignal, PriceQuote};

#[derive(Debug, Clone)]
struct Sample {
    price: Decimal,
    volume: Decimal,
}

pub struct MarketMonitor {
    window_size: usize,
    windows: BTreeMap<String, VecDeque<Sample>>,
    last_signal: Option<MarketSignal>,
}

impl MarketMonitor {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(2),
            windows: BTreeMap::new(),
            last_signal: None,
        }
    }

    /// Push a quote into its asset's window, evicting the oldest sample.
    pub fn record(&mut self, quote: &PriceQuote) {
        let window = self.windows.entry(quote.asset.clone()).or_default();
        window.push_back(Sample {
            price: quote.price,
            volume: quote.volume_24h,
        });
        while window.len() > self.window_size {
            window.pop_front();
        }
    }

    /// Number of samples currently held for an asset.
    pub fn samples(&self, asset: &str) -> usize {
        self.windows.get(asset).map_or(0, VecDeque::len)
    }

    /// Signal for one asset, or `None` with fewer than two samples.
    pub fn asset_signal(&self, asset: &str, now: DateTime<Utc>) -> Option<MarketSignal> {
        let window = self.windows.get(asset)?;
        if window.len() < 2 {
            return None;
        }
        let latest = window.back()?;
        let history = window.iter().take(window.len() - 1);

        let n = Decimal::from(window.len() - 1);
        let base_price = history.clone().map(|s| s.price).sum::<Decimal>() / n;
        let base_volume = history.map(|s| s.volume).sum::<Decimal>() / n;

        let price_change_pct = pct_change(latest.price, base_price);
        Some(MarketSignal {
            volatility_pct: price_change_pct.abs(),
            volume_surge_pct: pct_change(latest.volume, base_volume),
            price_change_pct,
            asset: Some(asset.to_string()),
            sampled_at: now,
        })
    }

    /// Aggregate signal over all tracked assets.
    ///
    /// Takes the strongest volatility and the strongest volume surge seen
    /// on any asset, and names the most volatile asset.
    pub fn sample(&mut self, now: DateTime<Utc>) -> MarketSignal {
        let mut aggregate = MarketSignal::quiet(now);
        let mut strongest_volume = f64::NEG_INFINITY;

        for asset in self.windows.keys() {
            let Some(sig) = self.asset_signal(asset, now) else {
                continue;
            };
            if aggregate.asset.is_none() || sig.volatility_pct > aggregate.volatility_pct {
                aggregate.volatility_pct = sig.volatility_pct;
                aggregate.price_change_pct = sig.price_change_pct;
                aggregate.asset = sig.asset.clone();
            }
            if sig.volume_surge_pct > strongest_volume {
                strongest_volume = sig.volume_surge_pct;
            }
        }
        if strongest_volume.is_finite() {
            aggregate.volume_surge_pct = strongest_volume;
        }

        debug!(signal = %aggregate, "Market sampled");
        self.last_signal = Some(aggregate.clone());
        aggregate
    }

    pub fn last_signal(&self) -> Option<&MarketSignal> {
        self.last_signal.as_ref()
    }
}

fn pct_change(latest: Decimal, baseline: Decimal) -> f64 {
    if baseline.is_zero() {
        return 0.0;
    }
    ((latest - baseline) / baseline * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap()
    }

    fn quote(asset: &str, price: Decimal, volume: Decimal) -> PriceQuote {
        PriceQuote {
            asset: asset.to_string(),
            price,
            volume_24h: volume,
            as_of: now(),
        }
    }

    #[test]
    fn test_single_sample_is_quiet() {
        let mut monitor = MarketMonitor::new(5);
        monitor.record(&quote("BTCUSDT", dec!(100), dec!(1000)));
        assert!(monitor.asset_signal("BTCUSDT", now()).is_none());
        let sig = monitor.sample(now());
        assert_eq!(sig.volatility_pct, 0.0);
        assert!(sig.asset.is_none());
    }

    #[test]
    fn test_price_drop_is_volatility() {
        let mut monitor = MarketMonitor::new(5);
        monitor.record(&quote("BTCUSDT", dec!(100), dec!(1000)));
        monitor.record(&quote("BTCUSDT", dec!(94), dec!(1000)));
        let sig = monitor.asset_signal("BTCUSDT", now()).unwrap();
        assert!((sig.volatility_pct - 6.0).abs() < 1e-9);
        assert!((sig.price_change_pct + 6.0).abs() < 1e-9);
        assert_eq!(sig.volume_surge_pct, 0.0);
    }

    #[test]
    fn test_baseline_is_window_mean() {
        let mut monitor = MarketMonitor::new(10);
        monitor.record(&quote("ETHUSDT", dec!(90), dec!(100)));
        monitor.record(&quote("ETHUSDT", dec!(110), dec!(100)));
        monitor.record(&quote("ETHUSDT", dec!(105), dec!(150)));
        let sig = monitor.asset_signal("ETHUSDT", now()).unwrap();
        // baseline price 100, volume 100
        assert!((sig.price_change_pct - 5.0).abs() < 1e-9);
        assert!((sig.volume_surge_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut monitor = MarketMonitor::new(3);
        for p in [10, 20, 30, 40, 50] {
            monitor.record(&quote("SOLUSDT", Decimal::from(p), dec!(1)));
        }
        assert_eq!(monitor.samples("SOLUSDT"), 3);
        let sig = monitor.asset_signal("SOLUSDT", now()).unwrap();
        // window [30, 40, 50]: baseline 35, latest 50
        assert!((sig.price_change_pct - (15.0 / 35.0 * 100.0)).abs() < 1e-6);
    }

    #[test]
    fn test_aggregate_takes_strongest_readings() {
        let mut monitor = MarketMonitor::new(5);
        monitor.record(&quote("BTCUSDT", dec!(100), dec!(1000)));
        monitor.record(&quote("BTCUSDT", dec!(101), dec!(1500)));
        monitor.record(&quote("SOLUSDT", dec!(20), dec!(500)));
        monitor.record(&quote("SOLUSDT", dec!(22), dec!(500)));

        let sig = monitor.sample(now());
        assert_eq!(sig.asset.as_deref(), Some("SOLUSDT"));
        assert!((sig.volatility_pct - 10.0).abs() < 1e-9);
        assert!((sig.volume_surge_pct - 50.0).abs() < 1e-9);
        assert_eq!(monitor.last_signal(), Some(&sig));
    }

    #[test]
    fn test_zero_baseline_is_flat() {
        let mut monitor = MarketMonitor::new(5);
        monitor.record(&quote("XRPUSDT", dec!(0), dec!(0)));
        monitor.record(&quote("XRPUSDT", dec!(1), dec!(10)));
        let sig = monitor.asset_signal("XRPUSDT", now()).unwrap();
        assert_eq!(sig.volatility_pct, 0.0);
        assert_eq!(sig.volume_surge_pct, 0.0);
    }
}

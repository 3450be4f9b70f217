//! Price feed: market data for the monitor and the price book.
//!
//! A background sampler task polls the feed on its own cadence and
//! forwards results over a channel, so a slow or failing exchange never
//! stalls the control loop (and a long gateway call never stalls
//! sampling).

pub mod binance;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{PriceQuote, PriceUnavailable};

pub use binance::BinanceFeed;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest quote for one asset.
    async fn quote(&self, asset: &str) -> Result<PriceQuote, PriceUnavailable>;

    fn name(&self) -> &'static str;
}

/// One sampler result, forwarded to the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Quote(PriceQuote),
    Unavailable(PriceUnavailable),
}

/// Poll every asset once.
pub async fn sample_all(feed: &dyn PriceFeed, assets: &[String]) -> Vec<FeedUpdate> {
    let mut updates = Vec::with_capacity(assets.len());
    for asset in assets {
        match feed.quote(asset).await {
            Ok(quote) => updates.push(FeedUpdate::Quote(quote)),
            Err(e) => {
                warn!(asset = %asset, error = %e, "Price unavailable; keeping last known price");
                updates.push(FeedUpdate::Unavailable(e));
            }
        }
    }
    updates
}

/// Spawn the sampler task. It stops when the receiver is dropped.
pub fn spawn_sampler(
    feed: Arc<dyn PriceFeed>,
    assets: Vec<String>,
    every: Duration,
    tx: mpsc::Sender<FeedUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let updates = sample_all(feed.as_ref(), &assets).await;
            debug!(feed = feed.name(), count = updates.len(), "Feed sampled");
            for update in updates {
                if tx.send(update).await.is_err() {
                    debug!("Feed receiver closed; sampler exiting");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn quote(asset: &str) -> PriceQuote {
        PriceQuote {
            asset: asset.to_string(),
            price: dec!(100),
            volume_24h: dec!(5000),
            as_of: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sample_all_keeps_order_and_failures() {
        let mut feed = MockPriceFeed::new();
        feed.expect_quote().returning(|asset| {
            if asset == "ETHUSDT" {
                Err(PriceUnavailable {
                    asset: asset.to_string(),
                    reason: "HTTP 503".into(),
                })
            } else {
                Ok(quote(asset))
            }
        });

        let assets = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let updates = sample_all(&feed, &assets).await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[0], FeedUpdate::Quote(q) if q.asset == "BTCUSDT"));
        assert!(matches!(&updates[1], FeedUpdate::Unavailable(e) if e.asset == "ETHUSDT"));
    }

    #[tokio::test]
    async fn test_sampler_forwards_until_receiver_dropped() {
        let mut feed = MockPriceFeed::new();
        feed.expect_quote().returning(|asset| Ok(quote(asset)));
        feed.expect_name().return_const("mock");

        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn_sampler(
            Arc::new(feed),
            vec!["SOLUSDT".to_string()],
            Duration::from_millis(10),
            tx,
        );

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, FeedUpdate::Quote(q) if q.asset == "SOLUSDT"));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sampler should exit")
            .unwrap();
    }
}

//! Price book: last known price per asset.
//!
//! Quotes from the feed overwrite the book; a failed fetch keeps the old
//! price and flags it stale so valuations can report it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::PriceQuote;

/// A price as seen by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMark {
    pub price: Decimal,
    /// The latest fetch for this asset failed; `price` is last known.
    pub stale: bool,
}

/// Anything the ledger can price assets against.
pub trait PriceLookup {
    fn mark(&self, asset: &str) -> Option<PriceMark>;

    fn price(&self, asset: &str) -> Option<Decimal> {
        self.mark(asset).map(|m| m.price)
    }
}

/// Plain maps are always fresh. Handy in tests and backfills.
impl PriceLookup for HashMap<String, Decimal> {
    fn mark(&self, asset: &str) -> Option<PriceMark> {
        self.get(asset).map(|&price| PriceMark { price, stale: false })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEntry {
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceBook {
    entries: BTreeMap<String, BookEntry>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh quote. Older quotes than the current entry are ignored.
    pub fn update(&mut self, quote: &PriceQuote) {
        if let Some(existing) = self.entries.get(&quote.asset) {
            if existing.as_of > quote.as_of {
                return;
            }
        }
        self.entries.insert(
            quote.asset.clone(),
            BookEntry {
                price: quote.price,
                as_of: quote.as_of,
                stale: false,
            },
        );
    }

    /// Flag an asset's last known price as stale. No-op for unknown assets.
    pub fn mark_stale(&mut self, asset: &str) {
        if let Some(entry) = self.entries.get_mut(asset) {
            entry.stale = true;
        }
    }

    pub fn get(&self, asset: &str) -> Option<&BookEntry> {
        self.entries.get(asset)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PriceLookup for PriceBook {
    fn mark(&self, asset: &str) -> Option<PriceMark> {
        self.entries.get(asset).map(|e| PriceMark {
            price: e.price,
            stale: e.stale,
        })
    }
}

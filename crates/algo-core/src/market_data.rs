//! Market-data snapshots and the shared snapshot store.
//!
//! Feed adapters write into [`MarketDataStore`] and then call
//! `AlgoManager::update`; the dispatch runners read the latest snapshot from
//! the store when they drain their dirty set.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::MdKey;

/// Last trade print plus accumulated volume.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub qty: f64,
    pub volume: f64,
}

/// Best bid / ask.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quote {
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
}

/// One snapshot for a (source, security) pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketData {
    /// Milliseconds since the Unix epoch of the last change.
    pub tm: i64,
    pub trade: Trade,
    pub quote: Quote,
}

impl MarketData {
    pub fn mid(&self) -> Option<f64> {
        let q = &self.quote;
        if q.bid_price > 0.0 && q.ask_price > 0.0 {
            Some((q.bid_price + q.ask_price) / 2.0)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tm == 0
    }
}

/// Latest snapshot per (source, security), shared by all runners.
#[derive(Debug, Default)]
pub struct MarketDataStore {
    snapshots: DashMap<MdKey, MarketData>,
}

impl MarketDataStore {
    pub fn new() -> Self {
        MarketDataStore::default()
    }

    /// Latest snapshot, or an empty one if nothing was published yet.
    pub fn get(&self, key: &MdKey) -> MarketData {
        self.snapshots.get(key).map(|md| *md).unwrap_or_default()
    }

    /// Record a trade print; volume accumulates.
    pub fn update_trade(&self, key: MdKey, price: f64, qty: f64) {
        let mut md = self.snapshots.entry(key).or_default();
        md.trade.price = price;
        md.trade.qty = qty;
        md.trade.volume += qty;
        md.tm = now_millis();
    }

    pub fn update_quote(&self, key: MdKey, quote: Quote) {
        let mut md = self.snapshots.entry(key).or_default();
        md.quote = quote;
        md.tm = now_millis();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

pub(crate) fn now_millis() -> i64 {
    // Never 0, so a published snapshot is distinguishable from an empty one.
    chrono::Utc::now().timestamp_millis().max(1)
}

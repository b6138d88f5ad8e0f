//! Per-lane dispatch runner.
//!
//! Each worker lane owns one runner. The runner caches, per (source,
//! security), the snapshot last delivered and the instruments interested in
//! it, plus the dirty set of keys with an undelivered update.
//!
//! `update` only marks a key dirty and wakes the lane. The lane later takes
//! the whole dirty set in one swap, so any number of updates to one key
//! between two cycles turn into a single delivery carrying the newest
//! snapshot and the one delivered before it. Both locks are held only for
//! the mutation itself, never while algo callbacks run.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::{Arc, Mutex};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::ids::MdKey;
use crate::instrument::Instrument;
use crate::market_data::MarketData;
use crate::util::lock;

#[derive(Debug)]
struct CacheEntry {
    md: MarketData,
    instruments: Vec<Arc<Instrument>>,
}

/// One key's worth of work for a dispatch cycle.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub latest: MarketData,
    pub previous: MarketData,
    pub instruments: Vec<Arc<Instrument>>,
}

impl Delivery {
    pub fn trade_changed(&self) -> bool {
        self.latest.trade != self.previous.trade
    }

    pub fn quote_changed(&self) -> bool {
        self.latest.quote != self.previous.quote
    }
}

#[derive(Debug, Default)]
pub(crate) struct DispatchRunner {
    cache: Mutex<HashMap<MdKey, CacheEntry>>,
    dirty: Mutex<HashSet<MdKey>>,
    wake: Notify,
}

impl DispatchRunner {
    pub fn new() -> Self {
        DispatchRunner::default()
    }

    /// Append `inst` to the interest list of its key, creating the entry
    /// with `current` as baseline if absent.
    pub fn register(&self, inst: Arc<Instrument>, current: MarketData) {
        let mut cache = lock(&self.cache);
        let entry = cache.entry(inst.key()).or_insert_with(|| CacheEntry {
            md: current,
            instruments: Vec::new(),
        });
        inst.set_md(entry.md);
        entry.instruments.push(inst);
    }

    /// Remove `inst` from its key's interest list; the entry goes away with
    /// its last instrument.
    pub fn deregister(&self, inst: &Instrument) {
        let key = inst.key();
        let mut cache = lock(&self.cache);
        let emptied = match cache.get_mut(&key) {
            Some(entry) => {
                entry.instruments.retain(|i| i.id() != inst.id());
                entry.instruments.is_empty()
            }
            None => false,
        };
        if emptied {
            cache.remove(&key);
            lock(&self.dirty).remove(&key);
        }
    }

    /// Mark `key` dirty if this runner has an entry for it. Returns whether
    /// it did.
    pub fn update(&self, key: MdKey) -> bool {
        if !lock(&self.cache).contains_key(&key) {
            return false;
        }
        let newly_dirty = {
            let mut dirty = lock(&self.dirty);
            let was_empty = dirty.is_empty();
            dirty.insert(key);
            was_empty
        };
        if newly_dirty {
            self.wake.notify_one();
        }
        true
    }

    pub fn has_dirty(&self) -> bool {
        !lock(&self.dirty).is_empty()
    }

    /// Take ownership of the dirty set, leaving it empty.
    pub fn take_dirty(&self) -> HashSet<MdKey> {
        mem::take(&mut *lock(&self.dirty))
    }

    /// Swap `latest` in as the cached snapshot for `key` and return what to
    /// deliver. `None` if nobody watches the key any more.
    pub fn advance(&self, key: MdKey, latest: MarketData) -> Option<Delivery> {
        let mut cache = lock(&self.cache);
        let entry = cache.get_mut(&key)?;
        let previous = mem::replace(&mut entry.md, latest);
        Some(Delivery {
            latest,
            previous,
            instruments: entry.instruments.clone(),
        })
    }

    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    #[cfg(test)]
    pub fn watches(&self, key: &MdKey) -> bool {
        lock(&self.cache).contains_key(key)
    }

    #[cfg(test)]
    pub fn interest(&self, key: &MdKey) -> usize {
        lock(&self.cache)
            .get(key)
            .map(|entry| entry.instruments.len())
            .unwrap_or(0)
    }
}

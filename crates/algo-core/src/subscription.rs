//! Process-wide market-data reference counts.
//!
//! One atomic count per (source, security) across all algos. Counts away
//! from the 0/1 boundary move with a lock-free compare-and-swap under the
//! shard's shared guard. A change that would cross the boundary is retried
//! under the shard's exclusive guard, so it is observed by exactly one caller
//! and the upstream subscribe / unsubscribe runs exactly once, in order with
//! any competing transition on the same key.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::ids::MdKey;

#[derive(Debug, Default)]
pub struct SubscriptionTable {
    counts: DashMap<MdKey, AtomicU32>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        SubscriptionTable::default()
    }

    /// Add one reference; runs `on_first` on the 0 -> 1 transition.
    /// Returns the new count.
    pub fn acquire<F: FnOnce()>(&self, key: MdKey, on_first: F) -> u32 {
        if let Some(count) = self.counts.get(&key) {
            let mut current = count.load(Ordering::Acquire);
            while current > 0 {
                match count.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return current + 1,
                    Err(actual) => current = actual,
                }
            }
        }

        let count = self.counts.entry(key).or_insert_with(|| AtomicU32::new(0));
        let previous = count.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            on_first();
        }
        previous + 1
    }

    /// Drop one reference; runs `on_last` on the 1 -> 0 transition.
    /// Releasing an unreferenced key is a no-op. Returns the new count.
    pub fn release<F: FnOnce()>(&self, key: MdKey, on_last: F) -> u32 {
        {
            let Some(count) = self.counts.get(&key) else {
                return 0;
            };
            let mut current = count.load(Ordering::Acquire);
            while current > 1 {
                match count.compare_exchange_weak(
                    current,
                    current - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return current - 1,
                    Err(actual) => current = actual,
                }
            }
        }

        let Some(count) = self.counts.get_mut(&key) else {
            return 0;
        };
        let current = count.load(Ordering::Acquire);
        if current == 0 {
            return 0;
        }
        count.store(current - 1, Ordering::Release);
        if current == 1 {
            on_last();
        }
        current - 1
    }

    pub fn count(&self, key: &MdKey) -> u32 {
        self.counts
            .get(key)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, key: &MdKey) -> bool {
        self.count(key) > 0
    }
}

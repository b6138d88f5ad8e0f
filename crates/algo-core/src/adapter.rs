//! Interfaces to the market-data and order adapters.
//!
//! The wire side of both lives outside this crate. A feed adapter publishes
//! into the [`MarketDataStore`](crate::market_data::MarketDataStore), then
//! calls `AlgoManager::update`; an order adapter reports back through
//! `AlgoManager::handle`.

use tracing::debug;

use crate::ids::MdKey;
use crate::order::Order;

/// Upstream market-data subscription control.
///
/// Called at most once per 0 -> 1 and 1 -> 0 reference-count transition of a
/// key, while that key's count is locked: implementations must not call back
/// into the manager synchronously.
pub trait MarketDataAdapter: Send + Sync {
    fn subscribe(&self, key: MdKey);
    fn unsubscribe(&self, key: MdKey);
}

/// Order submission path.
pub trait OrderRouter: Send + Sync {
    /// Submit a new order. An `Err` is a synchronous rejection.
    fn place(&self, order: &Order) -> Result<(), String>;

    /// Request cancellation of a live order.
    fn cancel(&self, order: &Order) -> Result<(), String>;
}

/// Adapter that accepts everything and only logs. Used when no venue is
/// attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAdapter;

impl MarketDataAdapter for NullAdapter {
    fn subscribe(&self, key: MdKey) {
        debug!(%key, "subscribe (no feed attached)");
    }

    fn unsubscribe(&self, key: MdKey) {
        debug!(%key, "unsubscribe (no feed attached)");
    }
}

impl OrderRouter for NullAdapter {
    fn place(&self, order: &Order) -> Result<(), String> {
        debug!(order_id = order.id, key = %order.key, "place (no router attached)");
        Ok(())
    }

    fn cancel(&self, order: &Order) -> Result<(), String> {
        debug!(order_id = order.id, "cancel (no router attached)");
        Ok(())
    }
}

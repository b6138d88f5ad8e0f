//! Per-algo handle on one (source, security) subscription.
//!
//! Instruments are never shared between algos, even on the same security;
//! what is shared is the market-data subscription behind them. The running
//! quantities move only through confirmation processing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::AlgoError;
use crate::ids::{AlgoId, DataSrc, InstrumentId, MdKey, OrderId, SecurityId};
use crate::market_data::MarketData;
use crate::order::{Confirmation, ExecType, Order, OrderStatus};
use crate::side::Side;
use crate::util::lock;

static NEXT_INSTRUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// The four running quantities of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Exposure {
    pub bought_qty: f64,
    pub sold_qty: f64,
    pub outstanding_buy_qty: f64,
    pub outstanding_sell_qty: f64,
}

impl Exposure {
    /// The single quantity transition, used live and by replay.
    ///
    /// - new: outstanding grows by `qty`,
    /// - fill: outstanding shrinks and bought/sold grows by `qty`,
    /// - cancel / reject: outstanding shrinks by `qty`.
    pub fn apply(&mut self, exec_type: ExecType, side: Side, qty: f64) {
        if qty == 0.0 {
            return;
        }
        let (done, outstanding) = match side {
            Side::Buy => (&mut self.bought_qty, &mut self.outstanding_buy_qty),
            Side::Sell => (&mut self.sold_qty, &mut self.outstanding_sell_qty),
        };
        match exec_type {
            ExecType::New => *outstanding += qty,
            ExecType::PartiallyFilled | ExecType::Filled => {
                *outstanding -= qty;
                *done += qty;
            }
            ExecType::Canceled | ExecType::Rejected => *outstanding -= qty,
        }
    }

    pub fn net_qty(&self) -> f64 {
        self.bought_qty - self.sold_qty
    }

    pub fn total_qty(&self) -> f64 {
        self.bought_qty + self.sold_qty
    }

    pub fn net_outstanding_qty(&self) -> f64 {
        self.outstanding_buy_qty - self.outstanding_sell_qty
    }

    pub fn total_outstanding_qty(&self) -> f64 {
        self.outstanding_buy_qty + self.outstanding_sell_qty
    }

    pub fn total_exposure(&self) -> f64 {
        self.total_qty() + self.total_outstanding_qty()
    }
}

/// Quantity effect of one confirmation, as persisted and replayed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfirmEffect {
    pub exec_type: ExecType,
    pub side: Side,
    /// Outstanding added for an order filled or canceled before its ack.
    pub implicit_new: f64,
    pub qty: f64,
}

impl ConfirmEffect {
    pub fn apply_to(&self, exposure: &mut Exposure) {
        exposure.apply(ExecType::New, self.side, self.implicit_new);
        exposure.apply(self.exec_type, self.side, self.qty);
    }
}

#[derive(Debug, Default)]
struct InstrumentState {
    exposure: Exposure,
    active_orders: BTreeMap<OrderId, Order>,
}

#[derive(Debug)]
pub struct Instrument {
    id: InstrumentId,
    algo_id: AlgoId,
    key: MdKey,
    md: Mutex<MarketData>,
    state: Mutex<InstrumentState>,
}

impl Instrument {
    pub(crate) fn new(algo_id: AlgoId, key: MdKey) -> Self {
        Instrument {
            id: NEXT_INSTRUMENT_ID.fetch_add(1, Ordering::Relaxed),
            algo_id,
            key,
            md: Mutex::new(MarketData::default()),
            state: Mutex::new(InstrumentState::default()),
        }
    }

    pub fn id(&self) -> InstrumentId {
        self.id
    }

    pub fn algo_id(&self) -> AlgoId {
        self.algo_id
    }

    pub fn key(&self) -> MdKey {
        self.key
    }

    pub fn src(&self) -> DataSrc {
        self.key.src
    }

    pub fn sec(&self) -> SecurityId {
        self.key.sec
    }

    /// Snapshot as of the last delivery to this instrument.
    pub fn md(&self) -> MarketData {
        *lock(&self.md)
    }

    pub fn active_orders(&self) -> Vec<Order> {
        lock(&self.state).active_orders.values().cloned().collect()
    }

    pub fn exposure(&self) -> Exposure {
        lock(&self.state).exposure
    }

    pub fn bought_qty(&self) -> f64 {
        self.exposure().bought_qty
    }

    pub fn sold_qty(&self) -> f64 {
        self.exposure().sold_qty
    }

    pub fn outstanding_buy_qty(&self) -> f64 {
        self.exposure().outstanding_buy_qty
    }

    pub fn outstanding_sell_qty(&self) -> f64 {
        self.exposure().outstanding_sell_qty
    }

    pub fn net_qty(&self) -> f64 {
        self.exposure().net_qty()
    }

    pub fn total_qty(&self) -> f64 {
        self.exposure().total_qty()
    }

    pub fn net_outstanding_qty(&self) -> f64 {
        self.exposure().net_outstanding_qty()
    }

    pub fn total_outstanding_qty(&self) -> f64 {
        self.exposure().total_outstanding_qty()
    }

    pub fn total_exposure(&self) -> f64 {
        self.exposure().total_exposure()
    }

    pub(crate) fn set_md(&self, md: MarketData) {
        *lock(&self.md) = md;
    }

    pub(crate) fn track(&self, order: Order) {
        lock(&self.state).active_orders.insert(order.id, order);
    }

    pub(crate) fn untrack(&self, order_id: OrderId) -> Option<Order> {
        lock(&self.state).active_orders.remove(&order_id)
    }

    pub(crate) fn restore_exposure(&self, exposure: Exposure) {
        lock(&self.state).exposure = exposure;
    }

    /// Apply a confirmation to the order it names.
    ///
    /// `commit` runs with the state locked, after the effect is known and
    /// before anything changes; if it fails nothing is applied. Returns
    /// `Ok(None)` when the order is not live on this instrument.
    pub(crate) fn confirm<F>(
        &self,
        cm: &Confirmation,
        commit: F,
    ) -> Result<Option<(ConfirmEffect, Order)>, AlgoError>
    where
        F: FnOnce(&ConfirmEffect, &Order) -> Result<(), AlgoError>,
    {
        let mut state = lock(&self.state);
        let Some(current) = state.active_orders.get(&cm.order_id) else {
            return Ok(None);
        };

        let mut order = current.clone();
        let pending = order.status == OrderStatus::PendingNew;
        let mut effect = ConfirmEffect {
            exec_type: cm.exec_type,
            side: order.side(),
            implicit_new: 0.0,
            qty: 0.0,
        };

        match cm.exec_type {
            ExecType::New => {
                if pending {
                    effect.qty = order.contract.qty;
                    order.status = OrderStatus::New;
                }
            }
            ExecType::PartiallyFilled | ExecType::Filled => {
                if pending {
                    effect.implicit_new = order.contract.qty;
                }
                let filled = cm.qty.min(order.leaves_qty()).max(0.0);
                effect.qty = filled;
                order.cum_qty += filled;
                order.status = if order.leaves_qty() <= 0.0 {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                };
            }
            ExecType::Canceled | ExecType::Rejected => {
                if !pending {
                    effect.qty = order.leaves_qty();
                }
                order.status = if cm.exec_type == ExecType::Canceled {
                    OrderStatus::Canceled
                } else {
                    OrderStatus::Rejected
                };
            }
        }

        commit(&effect, &order)?;

        effect.apply_to(&mut state.exposure);
        if order.is_live() {
            state.active_orders.insert(order.id, order.clone());
        } else {
            state.active_orders.remove(&order.id);
        }
        Ok(Some((effect, order)))
    }
}

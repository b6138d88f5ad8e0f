//! The strategy contract.
//!
//! A strategy implements [`Algo`]. Every callback of one algo runs on that
//! algo's worker lane, one at a time and in the order posted, so
//! implementations keep plain (unsynchronized) state in `self`.
//!
//! Callbacks receive an [`AlgoContext`], the algo's handle on the manager:
//! subscribe to market data, place and cancel orders, arm timers, stop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AlgoError;
use crate::ids::{AlgoId, DataSrc, MdKey, SecurityId, User};
use crate::instrument::Instrument;
use crate::manager::{AlgoEntry, Shared};
use crate::market_data::MarketData;
use crate::order::{Confirmation, Contract, Order};
use crate::params::{ParamDefs, ParamMap};

pub trait Algo: Send {
    /// Parameters this algo type accepts.
    fn param_defs(&self) -> ParamDefs;

    /// Called once, before any other callback, with validated parameters.
    /// An `Err` stops the algo before it is ever activated.
    fn on_start(&mut self, ctx: &mut AlgoContext<'_>, params: &ParamMap) -> Result<(), String>;

    /// Called with the supplied keys only; absent keys keep their value.
    fn on_modify(&mut self, _ctx: &mut AlgoContext<'_>, _params: &ParamMap) {}

    /// Last callback. `ctx.is_active()` is already false.
    fn on_stop(&mut self, _ctx: &mut AlgoContext<'_>) {}

    /// The trade part of `inst`'s snapshot changed since `previous`.
    fn on_market_trade(
        &mut self,
        _ctx: &mut AlgoContext<'_>,
        _inst: &Arc<Instrument>,
        _md: &MarketData,
        _previous: &MarketData,
    ) {
    }

    /// The quote part of `inst`'s snapshot changed since `previous`.
    fn on_market_quote(
        &mut self,
        _ctx: &mut AlgoContext<'_>,
        _inst: &Arc<Instrument>,
        _md: &MarketData,
        _previous: &MarketData,
    ) {
    }

    /// An order of `inst` changed state. Quantities on `inst` already
    /// include this confirmation.
    fn on_confirmation(
        &mut self,
        _ctx: &mut AlgoContext<'_>,
        _cm: &Confirmation,
        _inst: &Arc<Instrument>,
    ) {
    }

    /// A timer armed with [`AlgoContext::set_timeout`] fired.
    fn on_timer(&mut self, _ctx: &mut AlgoContext<'_>, _timer_id: u64) {}
}

/// An algo's view of the manager during one callback.
pub struct AlgoContext<'a> {
    shared: &'a Shared,
    entry: &'a Arc<AlgoEntry>,
}

impl<'a> AlgoContext<'a> {
    pub(crate) fn new(shared: &'a Shared, entry: &'a Arc<AlgoEntry>) -> Self {
        AlgoContext { shared, entry }
    }

    pub fn id(&self) -> AlgoId {
        self.entry.id
    }

    pub fn token(&self) -> &str {
        &self.entry.token
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn user(&self) -> &User {
        &self.entry.user
    }

    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }

    /// Create an instrument on (`src`, `sec`) and start receiving its market
    /// data. After a restart the instrument restored from the log for the
    /// same pair is handed back, quantities included.
    pub fn subscribe(&self, sec: SecurityId, src: DataSrc) -> Result<Arc<Instrument>, AlgoError> {
        self.shared.subscribe(self.entry, MdKey::new(src, sec))
    }

    /// Instruments this algo holds, in subscription order.
    pub fn instruments(&self) -> Vec<Arc<Instrument>> {
        self.entry.instruments()
    }

    pub fn place(&self, contract: Contract, inst: &Arc<Instrument>) -> Result<Order, AlgoError> {
        self.shared.place(self.entry, contract, inst)
    }

    /// Request cancellation. Returns false if the order is no longer live or
    /// the router refused.
    pub fn cancel(&self, order: &Order) -> bool {
        self.shared.cancel(self.entry, order)
    }

    /// Deliver `on_timer(timer_id)` on this algo's lane after `delay`.
    pub fn set_timeout(&self, delay: Duration, timer_id: u64) {
        self.shared.lane(self.entry).schedule_timer(self.entry.id, delay, timer_id);
    }

    /// Stop this algo. `on_stop` follows once the current callback returns.
    pub fn stop(&self) {
        // Failures are logged by the manager; the algo cannot act on them.
        let _ = self.shared.stop_entry(self.entry);
    }
}

impl fmt::Debug for AlgoContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgoContext")
            .field("id", &self.entry.id)
            .field("token", &self.entry.token)
            .finish()
    }
}

pub type AlgoFactory = Arc<dyn Fn() -> Box<dyn Algo> + Send + Sync>;

/// Algo types by name.
#[derive(Clone, Default)]
pub struct AlgoRegistry {
    factories: HashMap<String, AlgoFactory>,
}

impl AlgoRegistry {
    pub fn new() -> Self {
        AlgoRegistry::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Algo> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Algo>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for AlgoRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgoRegistry")
            .field("names", &self.names())
            .finish()
    }
}

//! The algo manager.
//!
//! Owns the registries (algos by id and by token, live orders), the global
//! subscription reference counts, the worker lanes and the event log.
//! Every state change that must survive a restart is appended to the log
//! before it takes effect; a failed append leaves the state untouched.
//!
//! Stop ordering: the stop record is written and the algo marked inactive
//! under its lifecycle lock, so nothing is delivered to it from then on.
//! Its lane then runs `on_stop`, drops its instruments from the lane's
//! dispatch runner and only then releases the reference counts. A key
//! whose count reached zero is therefore in no runner's cache, and
//! `update` on it is ignored.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::adapter::{MarketDataAdapter, NullAdapter, OrderRouter};
use crate::algo::{Algo, AlgoRegistry};
use crate::config::ManagerConfig;
use crate::error::{AlgoError, StoreError};
use crate::ids::{AlgoId, DataSrc, MdKey, OrderId, SecurityId, User};
use crate::instrument::{Exposure, Instrument};
use crate::lane::{self, LaneEvent, LaneHandle};
use crate::market_data::{MarketDataStore, Quote};
use crate::order::{Confirmation, Contract, Order, OrderStatus};
use crate::params::{self, ParamDefs, ParamMap};
use crate::replay::{ReplayState, ReplayedAlgo};
use crate::store::{ConfirmationBody, EventLog, ModifyBody, RecordKind, RecordSink, StartBody};
use crate::subscription::SubscriptionTable;
use crate::util::lock;

/// Names an algo by numeric id or by token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgoRef {
    Id(AlgoId),
    Token(String),
}

impl AlgoRef {
    /// All-digit text is an id, anything else a token.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.parse::<AlgoId>() {
            Ok(id) => AlgoRef::Id(id),
            Err(_) => AlgoRef::Token(s.to_string()),
        }
    }
}

impl From<AlgoId> for AlgoRef {
    fn from(id: AlgoId) -> Self {
        AlgoRef::Id(id)
    }
}

impl From<&str> for AlgoRef {
    fn from(token: &str) -> Self {
        AlgoRef::Token(token.to_string())
    }
}

impl fmt::Display for AlgoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgoRef::Id(id) => write!(f, "algo {id}"),
            AlgoRef::Token(token) => write!(f, "token {token}"),
        }
    }
}

/// External collaborators of the manager.
#[derive(Clone)]
pub struct Adapters {
    pub feed: Arc<dyn MarketDataAdapter>,
    pub router: Arc<dyn OrderRouter>,
    /// Snapshot store the feed writes before calling `update`.
    pub market_data: Arc<MarketDataStore>,
}

impl Adapters {
    pub fn new(feed: Arc<dyn MarketDataAdapter>, router: Arc<dyn OrderRouter>) -> Self {
        Adapters {
            feed,
            router,
            market_data: Arc::new(MarketDataStore::new()),
        }
    }
}

impl Default for Adapters {
    fn default() -> Self {
        Adapters::new(Arc::new(NullAdapter), Arc::new(NullAdapter))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentSnapshot {
    pub src: DataSrc,
    pub sec: SecurityId,
    pub exposure: Exposure,
    pub active_orders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgoSnapshot {
    pub id: AlgoId,
    pub token: String,
    pub name: String,
    pub user: User,
    pub lane: usize,
    pub active: bool,
    pub instruments: Vec<InstrumentSnapshot>,
}

/// Registry entry of one algo. The strategy object itself lives on the
/// algo's lane.
pub(crate) struct AlgoEntry {
    pub(crate) id: AlgoId,
    pub(crate) token: String,
    pub(crate) name: String,
    pub(crate) user: User,
    pub(crate) lane: usize,
    pub(crate) defs: ParamDefs,
    lifecycle: Mutex<()>,
    active: AtomicBool,
    instruments: Mutex<Vec<Arc<Instrument>>>,
    /// Restored from the log and not yet claimed by `subscribe`.
    restored: Mutex<Vec<Arc<Instrument>>>,
}

impl AlgoEntry {
    fn new(id: AlgoId, token: String, name: String, user: User, lane: usize, defs: ParamDefs) -> Self {
        AlgoEntry {
            id,
            token,
            name,
            user,
            lane,
            defs,
            lifecycle: Mutex::new(()),
            active: AtomicBool::new(true),
            instruments: Mutex::new(Vec::new()),
            restored: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub(crate) fn instruments(&self) -> Vec<Arc<Instrument>> {
        lock(&self.instruments).clone()
    }

    /// Remove and return the subscribed instruments, then the restored ones
    /// that were never claimed.
    pub(crate) fn take_instruments(&self) -> (Vec<Arc<Instrument>>, Vec<Arc<Instrument>>) {
        let unclaimed = mem::take(&mut *lock(&self.restored));
        (mem::take(&mut *lock(&self.instruments)), unclaimed)
    }

    fn claim_restored(&self, key: MdKey) -> Option<Arc<Instrument>> {
        let mut restored = lock(&self.restored);
        let pos = restored.iter().position(|inst| inst.key() == key)?;
        Some(restored.remove(pos))
    }

    fn holds(&self, sec: SecurityId) -> bool {
        lock(&self.instruments).iter().any(|inst| inst.sec() == sec)
            || lock(&self.restored).iter().any(|inst| inst.sec() == sec)
    }

    fn snapshot(&self) -> AlgoSnapshot {
        let mut all = self.instruments();
        all.extend(lock(&self.restored).iter().cloned());
        AlgoSnapshot {
            id: self.id,
            token: self.token.clone(),
            name: self.name.clone(),
            user: self.user.clone(),
            lane: self.lane,
            active: self.is_active(),
            instruments: all
                .iter()
                .map(|inst| InstrumentSnapshot {
                    src: inst.src(),
                    sec: inst.sec(),
                    exposure: inst.exposure(),
                    active_orders: inst.active_orders().len(),
                })
                .collect(),
        }
    }
}

#[derive(Clone)]
struct OrderOwner {
    algo_id: AlgoId,
    token: String,
    instrument: Arc<Instrument>,
}

/// State shared between the manager and its lanes.
pub(crate) struct Shared {
    registry: AlgoRegistry,
    algos: DashMap<AlgoId, Arc<AlgoEntry>>,
    tokens: DashMap<String, AlgoId>,
    orders: DashMap<OrderId, OrderOwner>,
    subscriptions: SubscriptionTable,
    pub(crate) market_data: Arc<MarketDataStore>,
    feed: Arc<dyn MarketDataAdapter>,
    router: Arc<dyn OrderRouter>,
    log: Arc<dyn EventLog>,
    lanes: Vec<LaneHandle>,
    next_algo_id: AtomicU32,
    next_order_id: AtomicU64,
    next_lane: AtomicUsize,
}

impl Shared {
    pub(crate) fn entry(&self, id: AlgoId) -> Option<Arc<AlgoEntry>> {
        self.algos.get(&id).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn lane(&self, entry: &AlgoEntry) -> &LaneHandle {
        &self.lanes[entry.lane]
    }

    fn pick_lane(&self) -> usize {
        self.next_lane.fetch_add(1, Ordering::Relaxed) % self.lanes.len()
    }

    pub(crate) fn subscribe(&self, entry: &Arc<AlgoEntry>, key: MdKey) -> Result<Arc<Instrument>, AlgoError> {
        if !entry.is_active() {
            return Err(AlgoError::Inactive(entry.id));
        }
        let inst = entry
            .claim_restored(key)
            .unwrap_or_else(|| Arc::new(Instrument::new(entry.id, key)));

        let count = self.subscriptions.acquire(key, || {
            info!(%key, "upstream subscribe");
            self.feed.subscribe(key);
        });
        self.lane(entry)
            .runner
            .register(Arc::clone(&inst), self.market_data.get(&key));
        lock(&entry.instruments).push(Arc::clone(&inst));

        debug!(algo_id = entry.id, %key, instrument = inst.id(), count, "instrument subscribed");
        Ok(inst)
    }

    pub(crate) fn release(&self, key: MdKey) {
        let count = self.subscriptions.release(key, || {
            info!(%key, "upstream unsubscribe");
            self.feed.unsubscribe(key);
        });
        debug!(%key, count, "subscription released");
    }

    pub(crate) fn place(
        &self,
        entry: &AlgoEntry,
        contract: Contract,
        inst: &Arc<Instrument>,
    ) -> Result<Order, AlgoError> {
        if !entry.is_active() {
            return Err(AlgoError::Inactive(entry.id));
        }
        if inst.algo_id() != entry.id {
            return Err(AlgoError::NotFound(format!(
                "instrument {} of algo {}",
                inst.id(),
                entry.id
            )));
        }

        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let order = Order::new(id, entry.id, inst.id(), inst.key(), contract);
        inst.track(order.clone());
        self.orders.insert(
            id,
            OrderOwner {
                algo_id: entry.id,
                token: entry.token.clone(),
                instrument: Arc::clone(inst),
            },
        );

        if let Err(reason) = self.router.place(&order) {
            inst.untrack(id);
            self.orders.remove(&id);
            warn!(algo_id = entry.id, order_id = id, %reason, "order rejected by router");
            return Err(AlgoError::OrderRejected(reason));
        }
        debug!(algo_id = entry.id, order_id = id, key = %order.key, "order placed");
        Ok(order)
    }

    pub(crate) fn cancel(&self, entry: &AlgoEntry, order: &Order) -> bool {
        if !self.orders.contains_key(&order.id) {
            debug!(algo_id = entry.id, order_id = order.id, "cancel for order that is not live");
            return false;
        }
        match self.router.cancel(order) {
            Ok(()) => true,
            Err(reason) => {
                warn!(algo_id = entry.id, order_id = order.id, %reason, "cancel refused by router");
                false
            }
        }
    }

    /// Post a confirmation to the owner's lane, unless its stop was already
    /// accepted.
    fn deliver_confirmation(&self, owner: &OrderOwner, cm: &Confirmation) {
        match self.entry(owner.algo_id) {
            Some(entry) if entry.is_active() => {
                let event = LaneEvent::Confirmation {
                    id: entry.id,
                    confirmation: cm.clone(),
                    instrument: Arc::clone(&owner.instrument),
                };
                if let Err(e) = self.lane(&entry).post(event) {
                    warn!(algo_id = entry.id, order_id = cm.order_id, error = %e, "confirmation not delivered");
                }
            }
            _ => debug!(algo_id = owner.algo_id, order_id = cm.order_id, "algo stopped; no callback"),
        }
    }

    /// Stop tracking orders of a finished algo that are still live. Later
    /// confirmations for them are answered with `NotFound`.
    pub(crate) fn forget_orders(&self, instruments: &[Arc<Instrument>]) -> usize {
        let mut forgotten = 0;
        for inst in instruments {
            for order in inst.active_orders() {
                if self.orders.remove(&order.id).is_some() {
                    warn!(
                        algo_id = inst.algo_id(),
                        order_id = order.id,
                        status = ?order.status,
                        "live order of finished algo no longer tracked"
                    );
                    forgotten += 1;
                }
            }
        }
        forgotten
    }

    /// Record the stop and deactivate, then post the stop to the lane.
    /// `Ok(false)` if the algo was already inactive.
    pub(crate) fn stop_entry(&self, entry: &AlgoEntry) -> Result<bool, AlgoError> {
        self.end(entry, "stopped", true)
    }

    /// Record the stop and deactivate without posting; the caller is the
    /// lane itself.
    pub(crate) fn retire(&self, entry: &AlgoEntry, status: &str) -> Result<bool, AlgoError> {
        self.end(entry, status, false)
    }

    fn end(&self, entry: &AlgoEntry, status: &str, post: bool) -> Result<bool, AlgoError> {
        let _guard = lock(&entry.lifecycle);
        if !entry.is_active() {
            return Ok(false);
        }
        if let Err(e) = self.log.append(entry.id, &entry.token, RecordKind::Stop, status, "") {
            error!(algo_id = entry.id, error = %e, "failed to persist stop");
            return Err(e.into());
        }
        entry.deactivate();
        if post {
            self.lane(entry).post(LaneEvent::Stop { id: entry.id })?;
        }
        Ok(true)
    }

    pub(crate) fn remove(&self, entry: &AlgoEntry) {
        self.algos.remove(&entry.id);
        self.tokens.remove_if(&entry.token, |_, id| *id == entry.id);
    }
}

/// Hosts algos on a fixed pool of worker lanes.
pub struct AlgoManager {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AlgoManager {
    /// Start the worker lanes. Call [`load_store`](Self::load_store) with
    /// no sink afterwards to restore algos from the log.
    pub fn start(
        config: ManagerConfig,
        registry: AlgoRegistry,
        log: Arc<dyn EventLog>,
        adapters: Adapters,
    ) -> Result<Self, AlgoError> {
        let threads = config.threads.max(1);
        let mut lanes = Vec::with_capacity(threads);
        let mut seeds = Vec::with_capacity(threads);
        for index in 0..threads {
            let (handle, seed) = lane::create(index)?;
            lanes.push(handle);
            seeds.push(seed);
        }

        let last_seq = log.last_seq();
        let shared = Arc::new(Shared {
            registry,
            algos: DashMap::new(),
            tokens: DashMap::new(),
            orders: DashMap::new(),
            subscriptions: SubscriptionTable::new(),
            market_data: adapters.market_data,
            feed: adapters.feed,
            router: adapters.router,
            log,
            lanes,
            next_algo_id: AtomicU32::new(1),
            next_order_id: AtomicU64::new(1),
            next_lane: AtomicUsize::new(0),
        });

        let manager = AlgoManager {
            shared,
            workers: Mutex::new(Vec::with_capacity(threads)),
        };
        for seed in seeds {
            let worker = seed.spawn(Arc::clone(&manager.shared))?;
            lock(&manager.workers).push(worker);
        }

        info!(threads, last_seq, "algo manager started");
        Ok(manager)
    }

    pub fn market_data(&self) -> &Arc<MarketDataStore> {
        &self.shared.market_data
    }

    pub fn registry(&self) -> &AlgoRegistry {
        &self.shared.registry
    }

    /// Start algo type `name` with already-typed parameters.
    ///
    /// Blocks until `on_start` has run on the algo's lane; must not be
    /// called from inside an async task.
    pub fn spawn(&self, name: &str, token: &str, user: User, params: &ParamMap) -> Result<AlgoId, AlgoError> {
        let raw = params::to_json(params);
        self.spawn_inner(name, token, user, params, raw)
    }

    /// Start algo type `name` from raw JSON parameters.
    pub fn spawn_raw(&self, name: &str, token: &str, user: User, raw: &str) -> Result<AlgoId, AlgoError> {
        let defs = self.param_defs(name)?;
        let params = params::from_json(&defs, raw)?;
        self.spawn_inner(name, token, user, &params, raw.to_string())
    }

    /// Parameter definitions of algo type `name`.
    pub fn param_defs(&self, name: &str) -> Result<ParamDefs, AlgoError> {
        self.create(name).map(|algo| algo.param_defs())
    }

    fn create(&self, name: &str) -> Result<Box<dyn Algo>, AlgoError> {
        self.shared.registry.create(name).ok_or_else(|| {
            warn!(name, "unknown algo type");
            AlgoError::UnknownAlgoType(name.to_string())
        })
    }

    fn spawn_inner(
        &self,
        name: &str,
        token: &str,
        user: User,
        params: &ParamMap,
        raw: String,
    ) -> Result<AlgoId, AlgoError> {
        let algo = self.create(name)?;
        let defs = algo.param_defs();
        let params = params::validate(&defs, params).map_err(|e| {
            warn!(name, token, error = %e, "spawn rejected");
            e
        })?;

        let shared = &self.shared;
        let id = shared.next_algo_id.fetch_add(1, Ordering::SeqCst);
        let token = if token.is_empty() {
            format!("{name}-{id}")
        } else {
            token.to_string()
        };
        match shared.tokens.entry(token.clone()) {
            Entry::Occupied(_) => {
                warn!(%token, "spawn rejected: token in use");
                return Err(AlgoError::DuplicateToken(token));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let body = StartBody {
            name: name.to_string(),
            user: user.clone(),
            params: raw,
        };
        let persisted = serde_json::to_string(&body)
            .map_err(StoreError::from)
            .and_then(|body| shared.log.append(id, &token, RecordKind::Start, "started", &body));
        if let Err(e) = persisted {
            shared.tokens.remove(&token);
            error!(algo_id = id, %token, error = %e, "failed to persist start");
            return Err(e.into());
        }

        let lane = shared.pick_lane();
        let entry = Arc::new(AlgoEntry::new(id, token, name.to_string(), user, lane, defs));
        shared.algos.insert(id, Arc::clone(&entry));
        self.start_on_lane(algo, entry, params, Vec::new())?;
        Ok(id)
    }

    fn start_on_lane(
        &self,
        algo: Box<dyn Algo>,
        entry: Arc<AlgoEntry>,
        params: ParamMap,
        modifications: Vec<ParamMap>,
    ) -> Result<(), AlgoError> {
        let (tx, rx) = oneshot::channel();
        let posted = self.shared.lane(&entry).post(LaneEvent::Start {
            algo,
            entry: Arc::clone(&entry),
            params,
            modifications,
            reply: Some(tx),
        });
        if let Err(e) = posted {
            self.shared.remove(&entry);
            return Err(e);
        }
        match rx.blocking_recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(AlgoError::StartFailed(reason)),
            Err(_) => Err(AlgoError::ShutDown),
        }
    }

    fn resolve(&self, algo: &AlgoRef) -> Result<Arc<AlgoEntry>, AlgoError> {
        let id = match algo {
            AlgoRef::Id(id) => Some(*id),
            AlgoRef::Token(token) => self.shared.tokens.get(token.as_str()).map(|id| *id),
        };
        id.and_then(|id| self.shared.entry(id)).ok_or_else(|| {
            warn!(%algo, "algo not found");
            AlgoError::NotFound(algo.to_string())
        })
    }

    /// Apply a partial parameter map to a running algo.
    pub fn modify(&self, algo: &AlgoRef, params: &ParamMap) -> Result<(), AlgoError> {
        let entry = self.resolve(algo)?;
        self.modify_inner(&entry, params.clone(), params::to_json(params))
    }

    pub fn modify_raw(&self, algo: &AlgoRef, raw: &str) -> Result<(), AlgoError> {
        let entry = self.resolve(algo)?;
        let params = params::from_json(&entry.defs, raw)?;
        self.modify_inner(&entry, params, raw.to_string())
    }

    fn modify_inner(&self, entry: &AlgoEntry, params: ParamMap, raw: String) -> Result<(), AlgoError> {
        params::check_ranges(&entry.defs, &params)?;

        let _guard = lock(&entry.lifecycle);
        if !entry.is_active() {
            warn!(algo_id = entry.id, "modify on inactive algo");
            return Err(AlgoError::Inactive(entry.id));
        }
        let body = serde_json::to_string(&ModifyBody { params: raw }).map_err(StoreError::from)?;
        self.shared
            .log
            .append(entry.id, &entry.token, RecordKind::Modify, "modified", &body)?;
        self.shared.lane(entry).post(LaneEvent::Modify {
            id: entry.id,
            params,
        })?;
        info!(algo_id = entry.id, token = %entry.token, "algo modified");
        Ok(())
    }

    /// Stop one algo. `Ok(false)` if it was already stopping.
    pub fn stop(&self, algo: &AlgoRef) -> Result<bool, AlgoError> {
        let entry = self.resolve(algo)?;
        self.shared.stop_entry(&entry)
    }

    /// Stop every algo. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        self.stop_matching(|_| true)
    }

    /// Stop every algo holding an instrument on `sec`, from any source.
    pub fn stop_security(&self, sec: SecurityId) -> usize {
        self.stop_matching(|entry| entry.holds(sec))
    }

    fn stop_matching<F: Fn(&AlgoEntry) -> bool>(&self, matches: F) -> usize {
        let entries: Vec<Arc<AlgoEntry>> = self
            .shared
            .algos
            .iter()
            .map(|e| Arc::clone(e.value()))
            .filter(|e| matches(e))
            .collect();

        let mut stopped = 0;
        for entry in entries {
            match self.shared.stop_entry(&entry) {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => warn!(algo_id = entry.id, error = %e, "stop failed"),
            }
        }
        stopped
    }

    /// Fresh data for (`src`, `sec`) is in the market-data store. Returns
    /// whether any lane watches the pair.
    pub fn update(&self, src: DataSrc, sec: SecurityId) -> bool {
        let key = MdKey::new(src, sec);
        if !self.shared.subscriptions.is_subscribed(&key) {
            trace!(%key, "update for unsubscribed key ignored");
            return false;
        }
        let mut watched = false;
        for lane in &self.shared.lanes {
            watched |= lane.runner.update(key);
        }
        watched
    }

    /// Record a trade in the market-data store and [`update`](Self::update).
    pub fn publish_trade(&self, src: DataSrc, sec: SecurityId, price: f64, qty: f64) -> bool {
        self.shared
            .market_data
            .update_trade(MdKey::new(src, sec), price, qty);
        self.update(src, sec)
    }

    /// Record a quote in the market-data store and [`update`](Self::update).
    pub fn publish_quote(&self, src: DataSrc, sec: SecurityId, quote: Quote) -> bool {
        self.shared.market_data.update_quote(MdKey::new(src, sec), quote);
        self.update(src, sec)
    }

    /// Apply an order-state change, persist it and deliver it to the owning
    /// algo. The lane event is posted while the instrument lock is held, so
    /// callbacks for one instrument arrive in log order. Confirmations that
    /// arrive after the stop was accepted still move quantities and are
    /// persisted, without a callback.
    pub fn handle(&self, cm: &Confirmation) -> Result<(), AlgoError> {
        let owner = match self.shared.orders.get(&cm.order_id) {
            Some(owner) => owner.value().clone(),
            None => {
                warn!(order_id = cm.order_id, exec_type = %cm.exec_type, "confirmation for unknown order");
                return Err(AlgoError::NotFound(format!("order {}", cm.order_id)));
            }
        };

        let shared = &self.shared;
        let applied = owner.instrument.confirm(cm, |effect, order| {
            let body = ConfirmationBody {
                order_id: order.id,
                src: order.key.src,
                sec: order.key.sec,
                order_qty: order.contract.qty,
                order_price: order.contract.price,
                order_type: order.contract.order_type,
                effect: *effect,
                price: cm.price,
                text: cm.text.clone(),
            };
            let body = serde_json::to_string(&body).map_err(StoreError::from)?;
            shared.log.append(
                owner.algo_id,
                &owner.token,
                RecordKind::Confirmation,
                cm.exec_type.as_str(),
                &body,
            )?;
            shared.deliver_confirmation(&owner, cm);
            Ok(())
        })?;

        let Some((effect, order)) = applied else {
            warn!(order_id = cm.order_id, "confirmation for order that is no longer live");
            return Err(AlgoError::NotFound(format!("order {}", cm.order_id)));
        };
        if !order.is_live() {
            self.shared.orders.remove(&order.id);
        }
        debug!(
            algo_id = owner.algo_id,
            order_id = order.id,
            exec_type = %effect.exec_type,
            qty = effect.qty,
            "confirmation applied"
        );
        Ok(())
    }

    /// Deliver `on_timer(timer_id)` to algo `id` after `delay`.
    pub fn set_timeout(&self, algo: &AlgoRef, delay: Duration, timer_id: u64) -> Result<(), AlgoError> {
        let entry = self.resolve(algo)?;
        if !entry.is_active() {
            return Err(AlgoError::Inactive(entry.id));
        }
        self.shared.lane(&entry).schedule_timer(entry.id, delay, timer_id);
        Ok(())
    }

    pub fn is_subscribed(&self, src: DataSrc, sec: SecurityId) -> bool {
        self.shared
            .subscriptions
            .is_subscribed(&MdKey::new(src, sec))
    }

    pub fn subscription_count(&self, src: DataSrc, sec: SecurityId) -> u32 {
        self.shared.subscriptions.count(&MdKey::new(src, sec))
    }

    /// Replay the log from `seq0`.
    ///
    /// Without a sink the records are folded and live algos are restored
    /// into this manager (startup recovery). With a sink they are streamed
    /// to it and nothing changes here. Returns the number of records
    /// replayed or sent.
    pub fn load_store(&self, seq0: u64, sink: Option<&dyn RecordSink>) -> Result<usize, AlgoError> {
        let records = self.shared.log.read_from(seq0)?;
        match sink {
            Some(sink) => {
                let mut sent = 0;
                for record in &records {
                    if !sink.send(record) {
                        debug!(seq = record.seq, "history sink closed");
                        break;
                    }
                    sent += 1;
                }
                Ok(sent)
            }
            None => {
                let state = ReplayState::fold(&records);
                self.restore(&state);
                Ok(records.len())
            }
        }
    }

    fn restore(&self, state: &ReplayState) {
        let shared = &self.shared;
        shared
            .next_algo_id
            .fetch_max(state.max_algo_id.saturating_add(1), Ordering::SeqCst);
        shared
            .next_order_id
            .fetch_max(state.max_order_id.saturating_add(1), Ordering::SeqCst);

        let mut restored = 0;
        for replayed in state.active_algos() {
            if shared.algos.contains_key(&replayed.id) {
                warn!(algo_id = replayed.id, "algo already running; not restored");
                continue;
            }
            match self.restore_algo(replayed) {
                Ok(()) => restored += 1,
                Err(e) => warn!(algo_id = replayed.id, token = %replayed.token, error = %e, "could not restore algo"),
            }
        }
        info!(restored, last_seq = state.last_seq, "event log replayed");
    }

    fn restore_algo(&self, replayed: &ReplayedAlgo) -> Result<(), AlgoError> {
        let shared = &self.shared;
        let algo = self.create(&replayed.name)?;
        let defs = algo.param_defs();
        let params = params::validate(&defs, &params::from_json(&defs, &replayed.params)?)?;
        let modifications = replayed
            .modifications
            .iter()
            .map(|raw| params::from_json(&defs, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let entry = Arc::new(AlgoEntry::new(
            replayed.id,
            replayed.token.clone(),
            replayed.name.clone(),
            replayed.user.clone(),
            shared.pick_lane(),
            defs,
        ));

        for (key, exposure) in &replayed.instruments {
            let inst = Arc::new(Instrument::new(replayed.id, *key));
            inst.restore_exposure(*exposure);
            for open in replayed.orders.values().filter(|o| o.key == *key) {
                let contract = Contract {
                    side: open.side,
                    qty: open.qty,
                    price: open.price,
                    order_type: open.order_type,
                    sub_account: None,
                };
                let mut order = Order::new(open.id, replayed.id, inst.id(), *key, contract);
                order.cum_qty = open.cum_qty;
                order.status = if open.cum_qty > 0.0 {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::New
                };
                inst.track(order);
                shared.orders.insert(
                    open.id,
                    OrderOwner {
                        algo_id: replayed.id,
                        token: replayed.token.clone(),
                        instrument: Arc::clone(&inst),
                    },
                );
            }
            lock(&entry.restored).push(inst);
        }

        shared.tokens.insert(replayed.token.clone(), replayed.id);
        shared.algos.insert(replayed.id, Arc::clone(&entry));
        self.start_on_lane(algo, entry, params, modifications)
    }

    pub fn get(&self, id: AlgoId) -> Option<AlgoSnapshot> {
        self.shared.entry(id).map(|entry| entry.snapshot())
    }

    pub fn get_by_token(&self, token: &str) -> Option<AlgoSnapshot> {
        let id = self.shared.tokens.get(token).map(|id| *id)?;
        self.get(id)
    }

    /// All registered algos, by id.
    pub fn snapshot(&self) -> Vec<AlgoSnapshot> {
        // Instrument locks are taken outside the map's shard locks.
        let entries: Vec<Arc<AlgoEntry>> = self
            .shared
            .algos
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut algos: Vec<AlgoSnapshot> = entries.iter().map(|e| e.snapshot()).collect();
        algos.sort_by_key(|a| a.id);
        algos
    }

    pub fn algo_count(&self) -> usize {
        self.shared.algos.len()
    }

    /// Wait until every lane has handled everything posted before this
    /// call and dispatched its dirty set. Blocking; must not be called from
    /// inside an async task.
    pub fn sync(&self) {
        for rx in self.barriers() {
            let _ = rx.blocking_recv();
        }
    }

    fn barriers(&self) -> Vec<oneshot::Receiver<()>> {
        self.shared
            .lanes
            .iter()
            .filter_map(|lane| {
                let (tx, rx) = oneshot::channel();
                lane.post(LaneEvent::Barrier(tx)).ok().map(|()| rx)
            })
            .collect()
    }

    /// Stop the lanes and join their threads. Algos are not stopped; they
    /// come back from the log on the next start.
    pub fn shutdown(&self) {
        let workers = mem::take(&mut *lock(&self.workers));
        if workers.is_empty() {
            return;
        }
        for lane in &self.shared.lanes {
            let _ = lane.post(LaneEvent::Shutdown);
        }
        for worker in workers {
            if worker.join().is_err() {
                error!("lane thread panicked");
            }
        }
        info!(lanes = self.shared.lanes.len(), "algo manager shut down");
    }
}

impl Drop for AlgoManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AlgoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgoManager")
            .field("lanes", &self.shared.lanes.len())
            .field("algos", &self.shared.algos.len())
            .finish()
    }
}

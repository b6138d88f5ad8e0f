// crates/algo-core/tests/common/mod.rs
//
// Shared fixtures: a recording feed, a scriptable router and an instrumented
// probe algo.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use algo_core::{
    Adapters, Algo, AlgoContext, AlgoId, AlgoManager, AlgoRegistry, Confirmation, Contract,
    DataSrc, EventLog, ExecType, Instrument, ManagerConfig, MarketData, MarketDataAdapter, MdKey,
    Order, OrderId, OrderRouter, ParamDef, ParamDefs, ParamMap, ParamValue, SecurityId,
    SecurityTuple, Side, User,
};

/// Timer id that parks the probe's lane on the probe's gate.
pub const PARK: u64 = 900;
/// Timer id that makes the probe stop itself.
pub const STOP_SELF: u64 = 901;

#[derive(Default)]
pub struct RecordingFeed {
    subscribes: Mutex<Vec<MdKey>>,
    unsubscribes: Mutex<Vec<MdKey>>,
}

impl RecordingFeed {
    pub fn subscribes(&self, key: MdKey) -> usize {
        self.subscribes.lock().unwrap().iter().filter(|k| **k == key).count()
    }

    pub fn unsubscribes(&self, key: MdKey) -> usize {
        self.unsubscribes.lock().unwrap().iter().filter(|k| **k == key).count()
    }
}

impl MarketDataAdapter for RecordingFeed {
    fn subscribe(&self, key: MdKey) {
        self.subscribes.lock().unwrap().push(key);
    }

    fn unsubscribe(&self, key: MdKey) {
        self.unsubscribes.lock().unwrap().push(key);
    }
}

#[derive(Default)]
pub struct MockRouter {
    placed: Mutex<Vec<Order>>,
    canceled: Mutex<Vec<OrderId>>,
    reject: AtomicBool,
}

impl MockRouter {
    pub fn placed(&self) -> Vec<Order> {
        self.placed.lock().unwrap().clone()
    }

    pub fn placed_by(&self, algo_id: AlgoId) -> Vec<Order> {
        self.placed().into_iter().filter(|o| o.algo_id == algo_id).collect()
    }

    pub fn canceled(&self) -> Vec<OrderId> {
        self.canceled.lock().unwrap().clone()
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

impl OrderRouter for MockRouter {
    fn place(&self, order: &Order) -> Result<(), String> {
        if self.reject.load(Ordering::SeqCst) {
            return Err("venue closed".to_string());
        }
        self.placed.lock().unwrap().push(order.clone());
        Ok(())
    }

    fn cancel(&self, order: &Order) -> Result<(), String> {
        self.canceled.lock().unwrap().push(order.id);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started,
    Modified(ParamMap),
    Stopped { active: bool },
    Trade { price: f64, previous: f64 },
    Quote { bid: f64, previous: f64 },
    Confirmed { exec_type: ExecType, bought: f64, outstanding: f64 },
    Timer(u64),
}

/// What every probe instance reports into.
#[derive(Default)]
pub struct Probe {
    events: Mutex<Vec<(AlgoId, Event)>>,
    in_flight: Mutex<HashMap<AlgoId, usize>>,
    overlaps: AtomicUsize,
    threads: Mutex<HashMap<AlgoId, HashSet<ThreadId>>>,
    prices: Mutex<HashMap<AlgoId, Vec<f64>>>,
    gate: Mutex<Option<Arc<Barrier>>>,
}

impl Probe {
    pub fn events(&self, id: AlgoId) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(algo, _)| *algo == id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn trades(&self, id: AlgoId) -> Vec<(f64, f64)> {
        self.events(id)
            .into_iter()
            .filter_map(|e| match e {
                Event::Trade { price, previous } => Some((price, previous)),
                _ => None,
            })
            .collect()
    }

    /// Prices of the confirmations delivered to `id`, in delivery order.
    pub fn confirmed_prices(&self, id: AlgoId) -> Vec<f64> {
        self.prices.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn threads_of(&self, id: AlgoId) -> usize {
        self.threads.lock().unwrap().get(&id).map(HashSet::len).unwrap_or(0)
    }

    /// Install a two-party barrier the probe waits on twice when a
    /// [`PARK`] timer fires: once on entry, once before returning.
    pub fn install_gate(&self) -> Arc<Barrier> {
        let gate = Arc::new(Barrier::new(2));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn enter(&self, id: AlgoId) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let n = in_flight.entry(id).or_insert(0);
        *n += 1;
        if *n > 1 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        drop(in_flight);
        self.threads
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .insert(thread::current().id());
    }

    fn leave(&self, id: AlgoId) {
        if let Some(n) = self.in_flight.lock().unwrap().get_mut(&id) {
            *n -= 1;
        }
    }

    fn record(&self, id: AlgoId, event: Event) {
        self.events.lock().unwrap().push((id, event));
    }
}

/// Subscribes to its `security` parameter on start and, when the tuple
/// carries a quantity, places one limit order at `price`.
pub struct ProbeAlgo {
    probe: Arc<Probe>,
    inst: Option<Arc<Instrument>>,
}

impl ProbeAlgo {
    fn observe<F: FnOnce(&Self) -> Option<Event>>(&self, ctx: &AlgoContext<'_>, f: F) {
        let id = ctx.id();
        self.probe.enter(id);
        // Widen the window for an overlapping call to show up.
        thread::yield_now();
        if let Some(event) = f(self) {
            self.probe.record(id, event);
        }
        self.probe.leave(id);
    }
}

impl Algo for ProbeAlgo {
    fn param_defs(&self) -> ParamDefs {
        vec![
            ParamDef::new("security", ParamValue::Security(SecurityTuple::default())).required(),
            ParamDef::new("price", ParamValue::Double(10.0)).range(0.0, 1_000_000.0).precision(2),
            ParamDef::new("fail", ParamValue::Bool(false)),
        ]
    }

    fn on_start(&mut self, ctx: &mut AlgoContext<'_>, params: &ParamMap) -> Result<(), String> {
        let tuple = params
            .get("security")
            .and_then(ParamValue::as_security)
            .cloned()
            .ok_or("security missing")?;
        let price = params.get("price").and_then(ParamValue::as_f64).unwrap_or(10.0);

        let inst = ctx.subscribe(tuple.sec, tuple.src).map_err(|e| e.to_string())?;
        if params.get("fail").and_then(ParamValue::as_bool) == Some(true) {
            return Err("told to fail".to_string());
        }
        if tuple.qty > 0.0 && inst.active_orders().is_empty() {
            ctx.place(Contract::limit(tuple.side, tuple.qty, price), &inst)
                .map_err(|e| e.to_string())?;
        }
        self.inst = Some(inst);
        self.observe(ctx, |_| Some(Event::Started));
        Ok(())
    }

    fn on_modify(&mut self, ctx: &mut AlgoContext<'_>, params: &ParamMap) {
        self.observe(ctx, |_| Some(Event::Modified(params.clone())));
    }

    fn on_stop(&mut self, ctx: &mut AlgoContext<'_>) {
        let active = ctx.is_active();
        self.observe(ctx, |_| Some(Event::Stopped { active }));
    }

    fn on_market_trade(
        &mut self,
        ctx: &mut AlgoContext<'_>,
        _inst: &Arc<Instrument>,
        md: &MarketData,
        previous: &MarketData,
    ) {
        self.observe(ctx, |_| {
            Some(Event::Trade {
                price: md.trade.price,
                previous: previous.trade.price,
            })
        });
    }

    fn on_market_quote(
        &mut self,
        ctx: &mut AlgoContext<'_>,
        _inst: &Arc<Instrument>,
        md: &MarketData,
        previous: &MarketData,
    ) {
        self.observe(ctx, |_| {
            Some(Event::Quote {
                bid: md.quote.bid_price,
                previous: previous.quote.bid_price,
            })
        });
    }

    fn on_confirmation(&mut self, ctx: &mut AlgoContext<'_>, cm: &Confirmation, inst: &Arc<Instrument>) {
        self.probe
            .prices
            .lock()
            .unwrap()
            .entry(ctx.id())
            .or_default()
            .push(cm.price);
        self.observe(ctx, |_| {
            Some(Event::Confirmed {
                exec_type: cm.exec_type,
                bought: inst.bought_qty(),
                outstanding: inst.outstanding_buy_qty(),
            })
        });
    }

    fn on_timer(&mut self, ctx: &mut AlgoContext<'_>, timer_id: u64) {
        match timer_id {
            PARK => {
                let gate = self.probe.gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.wait();
                    gate.wait();
                }
            }
            STOP_SELF => ctx.stop(),
            _ => {}
        }
        self.observe(ctx, |_| Some(Event::Timer(timer_id)));
    }
}

pub struct Harness {
    pub manager: AlgoManager,
    pub feed: Arc<RecordingFeed>,
    pub router: Arc<MockRouter>,
    pub probe: Arc<Probe>,
}

pub fn registry(probe: &Arc<Probe>) -> AlgoRegistry {
    let mut registry = AlgoRegistry::new();
    let probe = Arc::clone(probe);
    registry.register("probe", move || {
        Box::new(ProbeAlgo {
            probe: Arc::clone(&probe),
            inst: None,
        })
    });
    registry
}

pub fn harness(threads: usize, log: Arc<dyn EventLog>) -> Harness {
    let feed = Arc::new(RecordingFeed::default());
    let router = Arc::new(MockRouter::default());
    let probe = Arc::new(Probe::default());
    let adapters = Adapters::new(feed.clone(), router.clone());
    let manager = AlgoManager::start(
        ManagerConfig::default().with_threads(threads),
        registry(&probe),
        log,
        adapters,
    )
    .unwrap();
    Harness {
        manager,
        feed,
        router,
        probe,
    }
}

pub fn src() -> DataSrc {
    DataSrc::new("BBGX").unwrap()
}

pub fn key(sec: u32) -> MdKey {
    MdKey::new(src(), SecurityId(sec))
}

pub fn user() -> User {
    User::new(7, "desk")
}

/// Parameters for a probe on `sec`; `qty > 0` places a buy order.
pub fn probe_params(sec: u32, qty: f64) -> ParamMap {
    let mut params = ParamMap::new();
    params.insert(
        "security".to_string(),
        ParamValue::Security(SecurityTuple {
            src: src(),
            sec: SecurityId(sec),
            acc: None,
            side: Side::Buy,
            qty,
        }),
    );
    params
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

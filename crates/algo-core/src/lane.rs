//! Worker lanes.
//!
//! A lane is one OS thread driving a current-thread tokio runtime. Its
//! unbounded channel is the serialization lane: every callback of every algo
//! pinned to the lane is an event on that channel, handled one at a time in
//! posting order. The lane also owns one [`DispatchRunner`] and runs a
//! dispatch cycle whenever the runner reports dirty keys.
//!
//! Algo objects live in the lane's own map and are only ever touched by the
//! lane thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::algo::{Algo, AlgoContext};
use crate::error::AlgoError;
use crate::ids::AlgoId;
use crate::instrument::Instrument;
use crate::manager::{AlgoEntry, Shared};
use crate::order::Confirmation;
use crate::params::ParamMap;
use crate::runner::DispatchRunner;

pub(crate) type StartReply = oneshot::Sender<Result<(), String>>;

pub(crate) enum LaneEvent {
    Start {
        algo: Box<dyn Algo>,
        entry: Arc<AlgoEntry>,
        params: ParamMap,
        /// Modifications replayed after `on_start` when restoring.
        modifications: Vec<ParamMap>,
        reply: Option<StartReply>,
    },
    Modify {
        id: AlgoId,
        params: ParamMap,
    },
    Stop {
        id: AlgoId,
    },
    Confirmation {
        id: AlgoId,
        confirmation: Confirmation,
        instrument: Arc<Instrument>,
    },
    Timer {
        id: AlgoId,
        timer_id: u64,
    },
    /// Replied to once every earlier event and the dirty set are handled.
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// The manager's side of a lane.
pub(crate) struct LaneHandle {
    tx: mpsc::UnboundedSender<LaneEvent>,
    runtime: Handle,
    pub(crate) runner: Arc<DispatchRunner>,
}

impl LaneHandle {
    pub fn post(&self, event: LaneEvent) -> Result<(), AlgoError> {
        self.tx.send(event).map_err(|_| AlgoError::ShutDown)
    }

    pub fn schedule_timer(&self, id: AlgoId, delay: Duration, timer_id: u64) {
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LaneEvent::Timer { id, timer_id });
        });
    }
}

/// The thread side of a lane, before the thread is started.
pub(crate) struct LaneSeed {
    index: usize,
    rx: mpsc::UnboundedReceiver<LaneEvent>,
    runtime: Runtime,
    runner: Arc<DispatchRunner>,
}

pub(crate) fn create(index: usize) -> Result<(LaneHandle, LaneSeed), AlgoError> {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(AlgoError::Worker)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let runner = Arc::new(DispatchRunner::new());

    let handle = LaneHandle {
        tx,
        runtime: runtime.handle().clone(),
        runner: Arc::clone(&runner),
    };
    let seed = LaneSeed {
        index,
        rx,
        runtime,
        runner,
    };
    Ok((handle, seed))
}

impl LaneSeed {
    pub fn spawn(self, shared: Arc<Shared>) -> Result<JoinHandle<()>, AlgoError> {
        thread::Builder::new()
            .name(format!("algo-lane-{}", self.index))
            .spawn(move || self.run(shared))
            .map_err(AlgoError::Worker)
    }

    fn run(self, shared: Arc<Shared>) {
        let LaneSeed {
            index,
            mut rx,
            runtime,
            runner,
        } = self;
        let mut lane = Lane {
            index,
            shared,
            runner: Arc::clone(&runner),
            algos: HashMap::new(),
        };
        debug!(lane = index, "lane started");

        runtime.block_on(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(LaneEvent::Shutdown) | None => break,
                        Some(event) => lane.handle(event),
                    },
                    _ = runner.notified() => {}
                }
                if runner.has_dirty() {
                    lane.dispatch_cycle();
                }
            }
            info!(lane = index, algos = lane.algos.len(), "lane stopped");
        });
    }
}

struct Lane {
    index: usize,
    shared: Arc<Shared>,
    runner: Arc<DispatchRunner>,
    algos: HashMap<AlgoId, Box<dyn Algo>>,
}

impl Lane {
    fn handle(&mut self, event: LaneEvent) {
        match event {
            LaneEvent::Start {
                algo,
                entry,
                params,
                modifications,
                reply,
            } => {
                let result = self.start(algo, &entry, &params, &modifications);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            LaneEvent::Modify { id, params } => {
                self.with_algo(id, |algo, ctx| algo.on_modify(ctx, &params));
            }
            LaneEvent::Stop { id } => self.finish(id),
            LaneEvent::Confirmation {
                id,
                confirmation,
                instrument,
            } => {
                self.with_algo(id, |algo, ctx| {
                    algo.on_confirmation(ctx, &confirmation, &instrument)
                });
            }
            LaneEvent::Timer { id, timer_id } => {
                self.with_algo(id, |algo, ctx| algo.on_timer(ctx, timer_id));
            }
            LaneEvent::Barrier(reply) => {
                if self.runner.has_dirty() {
                    self.dispatch_cycle();
                }
                let _ = reply.send(());
            }
            LaneEvent::Shutdown => {}
        }
    }

    fn start(
        &mut self,
        mut algo: Box<dyn Algo>,
        entry: &Arc<AlgoEntry>,
        params: &ParamMap,
        modifications: &[ParamMap],
    ) -> Result<(), String> {
        let result = {
            let mut ctx = AlgoContext::new(&self.shared, entry);
            let result = algo.on_start(&mut ctx, params);
            if result.is_ok() {
                for modification in modifications {
                    algo.on_modify(&mut ctx, modification);
                }
            }
            result
        };
        self.algos.insert(entry.id, algo);

        match &result {
            Ok(()) => {
                info!(
                    algo_id = entry.id,
                    token = %entry.token,
                    name = %entry.name,
                    lane = self.index,
                    "algo started"
                );
            }
            Err(reason) => {
                warn!(algo_id = entry.id, token = %entry.token, %reason, "algo failed to start");
                if let Err(e) = self.shared.retire(entry, &format!("start failed: {reason}")) {
                    error!(algo_id = entry.id, error = %e, "could not record failed start");
                }
                entry.deactivate();
                self.finish(entry.id);
            }
        }
        result
    }

    /// Run `f` against algo `id` if this lane still holds it. An algo whose
    /// stop was accepted stays here until its Stop event is handled, so
    /// events posted ahead of the Stop are still delivered.
    fn with_algo<F>(&mut self, id: AlgoId, f: F) -> bool
    where
        F: FnOnce(&mut dyn Algo, &mut AlgoContext<'_>),
    {
        let Some(algo) = self.algos.get_mut(&id) else {
            trace!(algo_id = id, "event for finished algo dropped");
            return false;
        };
        let Some(entry) = self.shared.entry(id) else {
            return false;
        };
        let mut ctx = AlgoContext::new(&self.shared, &entry);
        f(algo.as_mut(), &mut ctx);
        true
    }

    /// Last step of a stop: `on_stop`, then drop the instruments from the
    /// runner and release their subscriptions. Orders still live after
    /// `on_stop` are no longer tracked.
    fn finish(&mut self, id: AlgoId) {
        let Some(entry) = self.shared.entry(id) else {
            return;
        };
        if let Some(mut algo) = self.algos.remove(&id) {
            let mut ctx = AlgoContext::new(&self.shared, &entry);
            algo.on_stop(&mut ctx);
        }

        let (instruments, unclaimed) = entry.take_instruments();
        for inst in &instruments {
            self.runner.deregister(inst);
            self.shared.release(inst.key());
        }
        let orphaned =
            self.shared.forget_orders(&instruments) + self.shared.forget_orders(&unclaimed);
        self.shared.remove(&entry);
        info!(
            algo_id = id,
            token = %entry.token,
            instruments = instruments.len(),
            orphaned,
            "algo stopped"
        );
    }

    fn dispatch_cycle(&mut self) {
        let dirty = self.runner.take_dirty();
        trace!(lane = self.index, keys = dirty.len(), "dispatch cycle");

        for key in dirty {
            let latest = self.shared.market_data.get(&key);
            let Some(delivery) = self.runner.advance(key, latest) else {
                continue;
            };
            let trade = delivery.trade_changed();
            let quote = delivery.quote_changed();
            if !trade && !quote {
                continue;
            }

            for inst in &delivery.instruments {
                inst.set_md(delivery.latest);
                self.with_algo(inst.algo_id(), |algo, ctx| {
                    if !ctx.is_active() {
                        return;
                    }
                    if trade {
                        algo.on_market_trade(ctx, inst, &delivery.latest, &delivery.previous);
                    }
                    if quote && ctx.is_active() {
                        algo.on_market_quote(ctx, inst, &delivery.latest, &delivery.previous);
                    }
                });
            }
        }
    }
}

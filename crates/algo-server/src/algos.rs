//! Algo types shipped with the server.
//!
//! - `monitor`: subscribes to one security and logs its market data and
//!   exposure, optionally on a heartbeat.
//! - `slicer`: works a target quantity in clips, joining the near side of
//!   the book with one order at a time, and stops itself when done.

use std::sync::Arc;
use std::time::Duration;

use algo_core::{
    Algo, AlgoContext, AlgoRegistry, Confirmation, Contract, Instrument, MarketData, ParamDef,
    ParamDefs, ParamMap, ParamValue, SecurityTuple, Side,
};
use tracing::{debug, info, warn};

const HEARTBEAT: u64 = 1;

/// Registry with every built-in algo type.
pub fn builtin_registry() -> AlgoRegistry {
    let mut registry = AlgoRegistry::new();
    registry
        .register("monitor", || Box::new(Monitor::default()))
        .register("slicer", || Box::new(Slicer::default()));
    registry
}

fn security_param(params: &ParamMap) -> Result<SecurityTuple, String> {
    params
        .get("security")
        .and_then(ParamValue::as_security)
        .cloned()
        .ok_or_else(|| "security missing".to_string())
}

// -----------------------------------------------------------------------------
// monitor
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Monitor {
    inst: Option<Arc<Instrument>>,
    heartbeat_ms: u64,
}

impl Monitor {
    fn arm(&self, ctx: &AlgoContext<'_>) {
        if self.heartbeat_ms > 0 {
            ctx.set_timeout(Duration::from_millis(self.heartbeat_ms), HEARTBEAT);
        }
    }

    fn read_heartbeat(&mut self, params: &ParamMap) -> bool {
        match params.get("heartbeat_ms").and_then(ParamValue::as_f64) {
            Some(ms) => {
                let was_off = self.heartbeat_ms == 0;
                self.heartbeat_ms = ms.max(0.0) as u64;
                was_off
            }
            None => false,
        }
    }
}

impl Algo for Monitor {
    fn param_defs(&self) -> ParamDefs {
        vec![
            ParamDef::new("security", ParamValue::Security(SecurityTuple::default())).required(),
            ParamDef::new("heartbeat_ms", ParamValue::Int64(0)).range(0.0, 3_600_000.0),
        ]
    }

    fn on_start(&mut self, ctx: &mut AlgoContext<'_>, params: &ParamMap) -> Result<(), String> {
        let tuple = security_param(params)?;
        let inst = ctx.subscribe(tuple.sec, tuple.src).map_err(|e| e.to_string())?;
        info!(algo_id = ctx.id(), key = %inst.key(), "monitoring");
        self.inst = Some(inst);
        self.read_heartbeat(params);
        self.arm(ctx);
        Ok(())
    }

    fn on_modify(&mut self, ctx: &mut AlgoContext<'_>, params: &ParamMap) {
        if self.read_heartbeat(params) {
            self.arm(ctx);
        }
    }

    fn on_market_trade(
        &mut self,
        ctx: &mut AlgoContext<'_>,
        inst: &Arc<Instrument>,
        md: &MarketData,
        _previous: &MarketData,
    ) {
        info!(
            algo_id = ctx.id(),
            key = %inst.key(),
            price = md.trade.price,
            qty = md.trade.qty,
            volume = md.trade.volume,
            "trade"
        );
    }

    fn on_market_quote(
        &mut self,
        ctx: &mut AlgoContext<'_>,
        inst: &Arc<Instrument>,
        md: &MarketData,
        _previous: &MarketData,
    ) {
        debug!(
            algo_id = ctx.id(),
            key = %inst.key(),
            bid = md.quote.bid_price,
            ask = md.quote.ask_price,
            "quote"
        );
    }

    fn on_timer(&mut self, ctx: &mut AlgoContext<'_>, timer_id: u64) {
        if timer_id != HEARTBEAT || self.heartbeat_ms == 0 || !ctx.is_active() {
            return;
        }
        if let Some(inst) = &self.inst {
            let exposure = inst.exposure();
            info!(
                algo_id = ctx.id(),
                key = %inst.key(),
                mid = inst.md().mid(),
                net = exposure.net_qty(),
                outstanding = exposure.total_outstanding_qty(),
                "heartbeat"
            );
        }
        self.arm(ctx);
    }
}

// -----------------------------------------------------------------------------
// slicer
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Slicer {
    inst: Option<Arc<Instrument>>,
    side: Side,
    target: f64,
    clip: f64,
    /// Worst acceptable price; 0 means none.
    limit: f64,
}

impl Slicer {
    fn done_qty(&self, inst: &Instrument) -> f64 {
        match self.side {
            Side::Buy => inst.bought_qty(),
            Side::Sell => inst.sold_qty(),
        }
    }

    fn price(&self, md: &MarketData) -> Option<f64> {
        let near = match self.side {
            Side::Buy => md.quote.bid_price,
            Side::Sell => md.quote.ask_price,
        };
        if near <= 0.0 {
            return None;
        }
        Some(match self.side {
            Side::Buy if self.limit > 0.0 => near.min(self.limit),
            Side::Sell if self.limit > 0.0 => near.max(self.limit),
            _ => near,
        })
    }

    /// Place the next clip if nothing is working and quantity remains.
    fn work(&self, ctx: &AlgoContext<'_>) {
        let Some(inst) = &self.inst else {
            return;
        };
        // A confirmation can still arrive while the stop is pending.
        if !ctx.is_active() {
            return;
        }
        if !inst.active_orders().is_empty() {
            return;
        }
        let remaining = self.target - self.done_qty(inst);
        if remaining <= 0.0 {
            return;
        }
        let Some(price) = self.price(&inst.md()) else {
            return;
        };
        let qty = self.clip.min(remaining);
        if let Err(e) = ctx.place(Contract::limit(self.side, qty, price), inst) {
            warn!(algo_id = ctx.id(), error = %e, "slice not placed");
        }
    }

    fn read_limits(&mut self, params: &ParamMap) {
        if let Some(clip) = params.get("clip").and_then(ParamValue::as_f64) {
            self.clip = clip;
        }
        if let Some(limit) = params.get("limit").and_then(ParamValue::as_f64) {
            self.limit = limit;
        }
    }
}

impl Algo for Slicer {
    fn param_defs(&self) -> ParamDefs {
        vec![
            ParamDef::new("security", ParamValue::Security(SecurityTuple::default()))
                .required()
                .range(1.0, 1e9),
            ParamDef::new("clip", ParamValue::Double(100.0)).range(1.0, 1e9),
            ParamDef::new("limit", ParamValue::Double(0.0)).precision(4),
        ]
    }

    fn on_start(&mut self, ctx: &mut AlgoContext<'_>, params: &ParamMap) -> Result<(), String> {
        let tuple = security_param(params)?;
        let inst = ctx.subscribe(tuple.sec, tuple.src).map_err(|e| e.to_string())?;
        self.side = tuple.side;
        self.target = tuple.qty;
        self.read_limits(params);
        info!(
            algo_id = ctx.id(),
            key = %inst.key(),
            side = ?self.side,
            target = self.target,
            clip = self.clip,
            "slicing"
        );
        self.inst = Some(inst);
        self.work(ctx);
        Ok(())
    }

    fn on_modify(&mut self, ctx: &mut AlgoContext<'_>, params: &ParamMap) {
        self.read_limits(params);
        self.work(ctx);
    }

    fn on_market_quote(
        &mut self,
        ctx: &mut AlgoContext<'_>,
        _inst: &Arc<Instrument>,
        _md: &MarketData,
        _previous: &MarketData,
    ) {
        self.work(ctx);
    }

    fn on_confirmation(&mut self, ctx: &mut AlgoContext<'_>, cm: &Confirmation, inst: &Arc<Instrument>) {
        if self.done_qty(inst) >= self.target {
            info!(algo_id = ctx.id(), order_id = cm.order_id, "target reached");
            ctx.stop();
            return;
        }
        self.work(ctx);
    }

    fn on_stop(&mut self, ctx: &mut AlgoContext<'_>) {
        if let Some(inst) = &self.inst {
            for order in inst.active_orders() {
                ctx.cancel(&order);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_core::Quote;

    #[test]
    fn registry_lists_builtins() {
        let registry = builtin_registry();
        assert_eq!(registry.names(), vec!["monitor".to_string(), "slicer".to_string()]);
    }

    #[test]
    fn slicer_prices_inside_its_limit() {
        let md = |bid, ask| MarketData {
            tm: 1,
            quote: Quote {
                bid_price: bid,
                bid_size: 100.0,
                ask_price: ask,
                ask_size: 100.0,
            },
            ..MarketData::default()
        };
        let mut slicer = Slicer {
            side: Side::Buy,
            limit: 10.0,
            ..Slicer::default()
        };
        assert_eq!(slicer.price(&md(9.5, 10.5)), Some(9.5));
        assert_eq!(slicer.price(&md(10.25, 10.5)), Some(10.0));
        assert_eq!(slicer.price(&md(0.0, 10.5)), None);

        slicer.side = Side::Sell;
        assert_eq!(slicer.price(&md(9.5, 9.75)), Some(10.0));
        slicer.limit = 0.0;
        assert_eq!(slicer.price(&md(9.5, 9.75)), Some(9.75));
    }
}

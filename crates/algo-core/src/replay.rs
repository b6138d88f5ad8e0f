//! Replay of the event log as a pure fold.
//!
//! `state = records.fold(ReplayState::default(), apply)`. Startup recovery
//! restores live algos from the folded state; nothing here touches the
//! manager.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::ids::{AlgoId, MdKey, OrderId, User};
use crate::instrument::Exposure;
use crate::order::ExecType;
use crate::order_type::OrderType;
use crate::side::Side;
use crate::store::{ConfirmationBody, ModifyBody, Record, RecordKind, StartBody};

/// An order still open at the end of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedOrder {
    pub id: OrderId,
    pub key: MdKey,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub order_type: OrderType,
    pub cum_qty: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedAlgo {
    pub id: AlgoId,
    pub token: String,
    pub name: String,
    pub user: User,
    /// Raw parameters of the start record.
    pub params: String,
    /// Raw parameters of each modify, in order.
    pub modifications: Vec<String>,
    pub active: bool,
    pub instruments: BTreeMap<MdKey, Exposure>,
    pub orders: BTreeMap<OrderId, ReplayedOrder>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayState {
    pub algos: BTreeMap<AlgoId, ReplayedAlgo>,
    pub last_seq: u64,
    pub max_algo_id: AlgoId,
    pub max_order_id: OrderId,
}

impl ReplayState {
    pub fn fold<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut state = ReplayState::default();
        for record in records {
            state.apply(record);
        }
        state
    }

    /// Apply one record. Records with unreadable bodies are skipped.
    pub fn apply(&mut self, record: &Record) {
        self.last_seq = self.last_seq.max(record.seq);
        self.max_algo_id = self.max_algo_id.max(record.algo_id);

        match record.kind {
            RecordKind::Start => match serde_json::from_str::<StartBody>(&record.body) {
                Ok(body) => {
                    self.algos.insert(
                        record.algo_id,
                        ReplayedAlgo {
                            id: record.algo_id,
                            token: record.token.clone(),
                            name: body.name,
                            user: body.user,
                            params: body.params,
                            modifications: Vec::new(),
                            active: true,
                            instruments: BTreeMap::new(),
                            orders: BTreeMap::new(),
                        },
                    );
                }
                Err(e) => warn!(seq = record.seq, error = %e, "unreadable start record"),
            },
            RecordKind::Modify => {
                let Some(algo) = self.algos.get_mut(&record.algo_id) else {
                    debug!(seq = record.seq, algo_id = record.algo_id, "modify for unknown algo");
                    return;
                };
                match serde_json::from_str::<ModifyBody>(&record.body) {
                    Ok(body) => algo.modifications.push(body.params),
                    Err(e) => warn!(seq = record.seq, error = %e, "unreadable modify record"),
                }
            }
            RecordKind::Stop => {
                if let Some(algo) = self.algos.get_mut(&record.algo_id) {
                    algo.active = false;
                }
            }
            RecordKind::Confirmation => {
                let body = match serde_json::from_str::<ConfirmationBody>(&record.body) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(seq = record.seq, error = %e, "unreadable confirmation record");
                        return;
                    }
                };
                self.max_order_id = self.max_order_id.max(body.order_id);
                let Some(algo) = self.algos.get_mut(&record.algo_id) else {
                    debug!(seq = record.seq, algo_id = record.algo_id, "confirmation for unknown algo");
                    return;
                };
                apply_confirmation(algo, &body);
            }
        }
    }

    pub fn active_algos(&self) -> impl Iterator<Item = &ReplayedAlgo> {
        self.algos.values().filter(|algo| algo.active)
    }
}

fn apply_confirmation(algo: &mut ReplayedAlgo, body: &ConfirmationBody) {
    let key = MdKey::new(body.src, body.sec);
    body.effect
        .apply_to(algo.instruments.entry(key).or_default());

    let order = algo.orders.entry(body.order_id).or_insert_with(|| ReplayedOrder {
        id: body.order_id,
        key,
        side: body.side(),
        qty: body.order_qty,
        price: body.order_price,
        order_type: body.order_type,
        cum_qty: 0.0,
    });

    let closed = match body.exec_type() {
        ExecType::New => false,
        ExecType::PartiallyFilled | ExecType::Filled => {
            order.cum_qty += body.effect.qty;
            order.cum_qty >= order.qty
        }
        ExecType::Canceled | ExecType::Rejected => true,
    };
    if closed {
        algo.orders.remove(&body.order_id);
    }
}

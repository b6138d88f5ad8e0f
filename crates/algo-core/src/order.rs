//! Orders placed by algos and the confirmations that move them.
//!
//! An [`Order`] is a value snapshot; the live copy sits in the owning
//! Instrument's active-order set and is updated by confirmation processing
//! only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{AlgoId, InstrumentId, MdKey, OrderId, SubAccountId};
use crate::order_type::OrderType;
use crate::side::Side;

/// What an algo asks for when placing an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub side: Side,
    pub qty: f64,
    /// Ignored for market orders.
    pub price: f64,
    pub order_type: OrderType,
    pub sub_account: Option<SubAccountId>,
}

impl Contract {
    pub fn limit(side: Side, qty: f64, price: f64) -> Self {
        Contract {
            side,
            qty,
            price,
            order_type: OrderType::Limit,
            sub_account: None,
        }
    }

    pub fn market(side: Side, qty: f64) -> Self {
        Contract {
            side,
            qty,
            price: 0.0,
            order_type: OrderType::Market,
            sub_account: None,
        }
    }

    pub fn with_sub_account(mut self, acc: SubAccountId) -> Self {
        self.sub_account = Some(acc);
        self
    }
}

/// Order lifecycle as seen by the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Sent, not yet acknowledged.
    PendingNew,
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_live(self) -> bool {
        matches!(
            self,
            OrderStatus::PendingNew | OrderStatus::New | OrderStatus::PartiallyFilled
        )
    }
}

/// Handle of an order owned by one algo / instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub algo_id: AlgoId,
    pub instrument_id: InstrumentId,
    pub key: MdKey,
    pub contract: Contract,
    pub cum_qty: f64,
    pub status: OrderStatus,
}

impl Order {
    pub fn new(
        id: OrderId,
        algo_id: AlgoId,
        instrument_id: InstrumentId,
        key: MdKey,
        contract: Contract,
    ) -> Self {
        Order {
            id,
            algo_id,
            instrument_id,
            key,
            contract,
            cum_qty: 0.0,
            status: OrderStatus::PendingNew,
        }
    }

    pub fn side(&self) -> Side {
        self.contract.side
    }

    pub fn leaves_qty(&self) -> f64 {
        (self.contract.qty - self.cum_qty).max(0.0)
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

/// Kind of order-state change carried by a [`Confirmation`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecType {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl ExecType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecType::New => "new",
            ExecType::PartiallyFilled => "partially_filled",
            ExecType::Filled => "filled",
            ExecType::Canceled => "canceled",
            ExecType::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ExecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ExecType::New),
            "partially_filled" => Ok(ExecType::PartiallyFilled),
            "filled" => Ok(ExecType::Filled),
            "canceled" => Ok(ExecType::Canceled),
            "rejected" => Ok(ExecType::Rejected),
            other => Err(format!("unknown exec type: {other}")),
        }
    }
}

/// An order-state change reported by the order adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub order_id: OrderId,
    pub exec_type: ExecType,
    /// Last filled quantity; unused for non-fill events.
    pub qty: f64,
    /// Last fill price; unused for non-fill events.
    pub price: f64,
    #[serde(default)]
    pub text: String,
}

impl Confirmation {
    pub fn new(order_id: OrderId, exec_type: ExecType) -> Self {
        Confirmation {
            order_id,
            exec_type,
            qty: 0.0,
            price: 0.0,
            text: String::new(),
        }
    }

    pub fn fill(order_id: OrderId, qty: f64, price: f64, last: bool) -> Self {
        let exec_type = if last {
            ExecType::Filled
        } else {
            ExecType::PartiallyFilled
        };
        Confirmation {
            qty,
            price,
            ..Confirmation::new(order_id, exec_type)
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

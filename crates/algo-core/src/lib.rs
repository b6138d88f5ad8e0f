//! algo-core
//!
//! Hosting core for trading algos:
//! - typed parameter model
//! - instruments, orders and confirmations
//! - reference-counted market-data subscriptions
//! - per-lane dispatch runners with coalescing dirty sets
//! - serialization lanes (one worker thread each)
//! - durable event log and replay
//! - the algo manager tying these together

pub mod side;
pub mod order_type;
pub mod ids;
pub mod error;
pub mod params;
pub mod market_data;
pub mod order;
pub mod instrument;
pub mod adapter;
pub mod subscription;
pub mod store;
pub mod replay;
pub mod algo;
pub mod config;
pub mod manager;

mod lane;
mod runner;
mod util;

pub use side::Side;
pub use order_type::OrderType;

pub use ids::{AlgoId, DataSrc, InstrumentId, MdKey, OrderId, SecurityId, SubAccountId, User};
pub use error::{AlgoError, ParamError, StoreError};
pub use params::{ParamDef, ParamDefs, ParamMap, ParamValue, SecurityTuple};
pub use market_data::{MarketData, MarketDataStore, Quote, Trade};
pub use order::{Confirmation, Contract, ExecType, Order, OrderStatus};
pub use instrument::{ConfirmEffect, Exposure, Instrument};
pub use adapter::{MarketDataAdapter, NullAdapter, OrderRouter};
pub use subscription::SubscriptionTable;
pub use store::{EventLog, FileEventLog, MemoryEventLog, Record, RecordKind, RecordSink};
pub use replay::ReplayState;
pub use algo::{Algo, AlgoContext, AlgoFactory, AlgoRegistry};
pub use config::ManagerConfig;
pub use manager::{Adapters, AlgoManager, AlgoRef, AlgoSnapshot, InstrumentSnapshot};

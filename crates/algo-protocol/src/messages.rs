//! Messages of the client surface.

use algo_core::{AlgoId, AlgoRef, Confirmation, DataSrc, Exposure, Quote, Record, SecurityId};
use thiserror::Error;

/// What a stop request applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTarget {
    All,
    Algo(AlgoRef),
    Security(SecurityId),
}

/// Client -> server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// Start algo type `name`; `params` is a JSON object.
    Spawn {
        name: String,
        token: String,
        params: String,
    },
    Modify {
        algo: AlgoRef,
        params: String,
    },
    Stop(StopTarget),
    /// List running algos, or one of them.
    Query(Option<AlgoRef>),
    /// Stream persisted records with `seq >= seq0`.
    History {
        seq0: u64,
    },
    /// Feed side: a trade print for (`src`, `sec`).
    Trade {
        src: DataSrc,
        sec: SecurityId,
        price: f64,
        qty: f64,
    },
    /// Feed side: a new top-of-book quote.
    Quote {
        src: DataSrc,
        sec: SecurityId,
        quote: Quote,
    },
    /// Order side: an order-state change.
    Confirm(Confirmation),
}

/// Server -> client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerReply {
    Spawned {
        id: AlgoId,
        token: String,
    },
    Ack(String),
    Error(String),
    /// One algo of a query result.
    AlgoRow {
        id: AlgoId,
        token: String,
        name: String,
        user: String,
        active: bool,
    },
    /// One instrument of the algo in the preceding row.
    InstrumentRow {
        id: AlgoId,
        src: DataSrc,
        sec: SecurityId,
        exposure: Exposure,
    },
    Record(Record),
    /// Ends a query or history stream; carries the number of rows sent.
    End(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("wrong field count for {kind}: expected {expected}, got {got}")]
    FieldCount {
        kind: char,
        expected: usize,
        got: usize,
    },

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

//! Error types for the algo engine.
//!
//! Parameter problems are reported as [`ParamError`] and surface to callers
//! as plain strings. Everything the manager can refuse is an [`AlgoError`].

use thiserror::Error;

use crate::ids::AlgoId;

/// Parameter validation / parsing failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// A required definition has no matching key.
    #[error("missing required parameter: {0}")]
    MissingRequired(String),

    /// A numeric value is outside `[min_value, max_value]`.
    #[error("value out of range for {name}: {value} not in [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A supplied value does not fit the declared kind.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    /// The raw parameter text is not a JSON object.
    #[error("malformed parameters: {0}")]
    Malformed(String),
}

/// Event-log failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Injected by [`MemoryEventLog`](crate::store::MemoryEventLog).
    #[error("log unavailable")]
    Unavailable,
}

/// Errors returned by the [`AlgoManager`](crate::manager::AlgoManager).
#[derive(Debug, Error)]
pub enum AlgoError {
    #[error(transparent)]
    InvalidParams(#[from] ParamError),

    #[error("unknown algo type: {0}")]
    UnknownAlgoType(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("algo {0} is not active")]
    Inactive(AlgoId),

    #[error("token already in use: {0}")]
    DuplicateToken(String),

    /// `on_start` refused; the algo was stopped without being activated.
    #[error("algo failed to start: {0}")]
    StartFailed(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("failed to start worker lane: {0}")]
    Worker(#[source] std::io::Error),

    #[error("algo manager is shut down")]
    ShutDown,
}

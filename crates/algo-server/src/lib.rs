//! algo-server
//!
//! Multi-client async TCP server hosting one `AlgoManager`.

pub mod algos;
pub mod config;
pub mod server;
pub mod types;

// internal modules, not re-exported
mod manager_task;
mod session;

//! Shared types for the algo TCP server.
//!
//! This module defines:
//! - `ClientId`: a lightweight handle for connected clients
//! - channel aliases between client sessions and the manager task
//! - `ManagerRequest`: messages flowing from sessions to the manager task

use std::collections::HashMap;
use std::sync::Arc;

use algo_protocol::{ClientRequest, ServerReply};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

/// Identifier for a connected client, unique over the lifetime of the
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Replies from the manager task to a given client.
pub type OutboundTx = mpsc::UnboundedSender<ServerReply>;
pub type OutboundRx = mpsc::UnboundedReceiver<ServerReply>;

/// Registry of connected clients and their outbound channels.
pub type ClientRegistry = Arc<RwLock<HashMap<ClientId, OutboundTx>>>;

/// A parsed request from one client session.
#[derive(Debug)]
pub struct ManagerRequest {
    pub client_id: ClientId,
    pub request: ClientRequest,
}

/// Channel from sessions to the manager task.
pub type ManagerTx = mpsc::UnboundedSender<ManagerRequest>;
pub type ManagerRx = mpsc::UnboundedReceiver<ManagerRequest>;

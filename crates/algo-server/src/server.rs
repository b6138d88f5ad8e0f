//! TCP listener and top-level server wiring.
//!
//! This module:
//! - Listens on the configured address/port.
//! - Accepts new TCP connections, up to `max_clients` at a time.
//! - Assigns each connection a `ClientId`.
//! - Spawns a session task per connection and one blocking manager task
//!   that feeds requests to the `AlgoManager`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use algo_core::AlgoManager;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::manager_task;
use crate::session;
use crate::types::{ClientId, ClientRegistry, ManagerRx, ManagerTx, OutboundRx, OutboundTx};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_client_id() -> ClientId {
    ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Bind the configured address and serve until the listener fails.
pub async fn run(config: &ServerConfig, manager: Arc<AlgoManager>) -> Result<()> {
    let addr = config.socket_addr_string();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");
    run_with_listener(listener, manager, config.max_clients).await
}

/// Serve on an already-bound listener.
pub async fn run_with_listener(
    listener: TcpListener,
    manager: Arc<AlgoManager>,
    max_clients: usize,
) -> Result<()> {
    let clients: ClientRegistry = Arc::new(tokio::sync::RwLock::new(Default::default()));

    let (manager_tx, manager_rx): (ManagerTx, ManagerRx) = mpsc::unbounded_channel();
    {
        let clients = clients.clone();
        tokio::task::spawn_blocking(move || {
            manager_task::run_manager_loop(manager, manager_rx, clients);
        });
    }

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let current_clients = clients.read().await.len();
        if current_clients >= max_clients {
            warn!(%peer_addr, max_clients, "rejecting connection: max_clients reached");
            continue;
        }

        let client_id = next_client_id();
        info!(client_id = client_id.0, %peer_addr, "accepted connection");

        let (out_tx, out_rx): (OutboundTx, OutboundRx) = mpsc::unbounded_channel();
        clients.write().await.insert(client_id, out_tx.clone());

        let clients = clients.clone();
        let manager_tx = manager_tx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                session::run_session(client_id, stream, manager_tx, out_tx, out_rx, clients).await
            {
                error!(client_id = client_id.0, error = %e, "session error");
            }
        });
    }
}

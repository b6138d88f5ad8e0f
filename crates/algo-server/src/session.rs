//! Per-connection I/O.

use algo_protocol::{format_reply, parse_request, ServerReply};
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::types::{ClientId, ClientRegistry, ManagerRequest, ManagerTx, OutboundRx, OutboundTx};

/// Run the I/O loop for a single connection.
///
/// Replies are written by a separate task fed from `out_rx`; the reader
/// parses request lines and forwards them to the manager task. Lines that
/// do not parse are answered here with an `E` reply.
pub async fn run_session(
    client_id: ClientId,
    stream: TcpStream,
    manager_tx: ManagerTx,
    out_tx: OutboundTx,
    out_rx: OutboundRx,
    clients: ClientRegistry,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();

    tokio::spawn(write_replies(client_id, write_half, out_rx));

    let result = read_requests(client_id, read_half, &manager_tx, &out_tx).await;

    {
        let mut guard = clients.write().await;
        guard.remove(&client_id);
    }

    result
}

async fn read_requests(
    client_id: ClientId,
    read_half: OwnedReadHalf,
    manager_tx: &ManagerTx,
    out_tx: &OutboundTx,
) -> Result<()> {
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_request(&line) {
            Ok(Some(request)) => {
                debug!(client_id = client_id.0, ?request, "request");
                let req = ManagerRequest { client_id, request };
                if manager_tx.send(req).is_err() {
                    warn!("manager channel closed");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(client_id = client_id.0, error = %e, line = %line.trim(), "invalid request");
                let _ = out_tx.send(ServerReply::Error(e.to_string()));
            }
        }
    }

    info!(client_id = client_id.0, "client disconnected");
    Ok(())
}

async fn write_replies(client_id: ClientId, mut write_half: OwnedWriteHalf, mut out_rx: OutboundRx) {
    while let Some(reply) = out_rx.recv().await {
        let line = format!("{}\n", format_reply(&reply));
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            warn!(client_id = client_id.0, error = %e, "write error");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

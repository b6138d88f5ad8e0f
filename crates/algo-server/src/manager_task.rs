//! Central manager loop.
//!
//! Runs on a blocking thread and owns the request side of the
//! `AlgoManager`: every `ManagerRequest` from every session is handled here,
//! in arrival order. Manager calls that wait on a lane (spawn, sync, history)
//! block this thread, never the async runtime.
//!
//! Replies go to the originating client only.

use std::sync::Arc;

use algo_core::{AlgoError, AlgoManager, AlgoRef, AlgoSnapshot, Record, RecordSink, User};
use algo_protocol::{ClientRequest, ServerReply, StopTarget};
use tracing::{debug, info, warn};

use crate::types::{ClientId, ClientRegistry, ManagerRequest, ManagerRx, OutboundTx};

/// Run the central manager loop until every sender is gone.
pub fn run_manager_loop(manager: Arc<AlgoManager>, mut rx: ManagerRx, clients: ClientRegistry) {
    while let Some(ManagerRequest { client_id, request }) = rx.blocking_recv() {
        let out = {
            let guard = clients.blocking_read();
            guard.get(&client_id).cloned()
        };
        let Some(out) = out else {
            debug!(client_id = client_id.0, "request from departed client dropped");
            continue;
        };
        execute(&manager, client_id, request, &out);
    }

    info!("manager loop shutting down (request channel closed)");
}

/// Carry out one request and send its replies to `out`.
pub(crate) fn execute(manager: &AlgoManager, client_id: ClientId, request: ClientRequest, out: &OutboundTx) {
    let send = |reply: ServerReply| {
        let _ = out.send(reply);
    };

    match request {
        ClientRequest::Spawn {
            name,
            token,
            params,
        } => {
            let user = User::new(client_id.0 as u32, format!("client-{}", client_id.0));
            match manager.spawn_raw(&name, &token, user, &params) {
                Ok(id) => {
                    let token = manager.get(id).map(|algo| algo.token).unwrap_or(token);
                    send(ServerReply::Spawned { id, token });
                }
                Err(e) => send(error_reply(&e)),
            }
        }
        ClientRequest::Modify { algo, params } => match manager.modify_raw(&algo, &params) {
            Ok(()) => send(ServerReply::Ack("modified".to_string())),
            Err(e) => send(error_reply(&e)),
        },
        ClientRequest::Stop(StopTarget::Algo(algo)) => match manager.stop(&algo) {
            Ok(true) => send(ServerReply::Ack("stopped".to_string())),
            Ok(false) => send(ServerReply::Ack("already stopping".to_string())),
            Err(e) => send(error_reply(&e)),
        },
        ClientRequest::Stop(StopTarget::All) => {
            let n = manager.stop_all();
            send(ServerReply::Ack(format!("stopped {n}")));
        }
        ClientRequest::Stop(StopTarget::Security(sec)) => {
            let n = manager.stop_security(sec);
            send(ServerReply::Ack(format!("stopped {n}")));
        }
        ClientRequest::Query(target) => {
            manager.sync();
            let algos = match target {
                None => manager.snapshot(),
                Some(algo) => match lookup(manager, &algo) {
                    Some(snapshot) => vec![snapshot],
                    None => {
                        send(ServerReply::Error(format!("not found: {algo}")));
                        return;
                    }
                },
            };
            let rows = algos.len();
            for algo in algos {
                send_algo_rows(algo, &send);
            }
            send(ServerReply::End(rows));
        }
        ClientRequest::History { seq0 } => {
            let sink = |record: &Record| out.send(ServerReply::Record(record.clone())).is_ok();
            match manager.load_store(seq0, Some(&sink as &dyn RecordSink)) {
                Ok(sent) => send(ServerReply::End(sent)),
                Err(e) => send(error_reply(&e)),
            }
        }
        ClientRequest::Trade {
            src,
            sec,
            price,
            qty,
        } => {
            manager.publish_trade(src, sec, price, qty);
        }
        ClientRequest::Quote { src, sec, quote } => {
            manager.publish_quote(src, sec, quote);
        }
        ClientRequest::Confirm(cm) => {
            if let Err(e) = manager.handle(&cm) {
                send(error_reply(&e));
            }
        }
    }
}

fn lookup(manager: &AlgoManager, algo: &AlgoRef) -> Option<AlgoSnapshot> {
    match algo {
        AlgoRef::Id(id) => manager.get(*id),
        AlgoRef::Token(token) => manager.get_by_token(token),
    }
}

fn send_algo_rows(algo: AlgoSnapshot, send: &impl Fn(ServerReply)) {
    send(ServerReply::AlgoRow {
        id: algo.id,
        token: algo.token,
        name: algo.name,
        user: algo.user.name,
        active: algo.active,
    });
    for inst in algo.instruments {
        send(ServerReply::InstrumentRow {
            id: algo.id,
            src: inst.src,
            sec: inst.sec,
            exposure: inst.exposure,
        });
    }
}

fn error_reply(e: &AlgoError) -> ServerReply {
    warn!(error = %e, "request failed");
    ServerReply::Error(e.to_string())
}

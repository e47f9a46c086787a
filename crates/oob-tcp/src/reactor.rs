//! Reactor operations and the loop that executes them
//!
//! Every change to peer state happens inside [`TransportModule::dispatch`],
//! one operation at a time. Other contexts (the component, listeners,
//! readiness watchers, timers, connect tasks) only post operations.

use crate::connection::AcceptOutcome;
use crate::error::TcpResult;
use crate::module::TransportModule;
use crate::peer::PeerSnapshot;
use oob_core::{OutboundMessage, ProcessName};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Reply channel of an accept request.
pub(crate) type AcceptReply = oneshot::Sender<TcpResult<AcceptOutcome>>;

/// Work posted to the reactor.
pub(crate) enum ReactorOp {
    /// Queue `msg` on the peer `hop`
    Send { hop: ProcessName, msg: OutboundMessage },
    /// Consult the topology for `msg` again
    Route(OutboundMessage),
    /// Record candidate addresses of a peer
    SetPeer {
        name: ProcessName,
        addrs: Vec<SocketAddr>,
    },
    /// Inbound connection handed over by a listener or caller
    Accept {
        stream: std::net::TcpStream,
        addr: SocketAddr,
        reply: Option<AcceptReply>,
    },
    /// An accepted socket has its identification ready, or timed out
    PendingReadable { id: u64, timed_out: bool },
    /// Socket of peer `key` became readable
    Readable { key: u64, gen: u64 },
    /// Socket of peer `key` became writable
    Writable { key: u64, gen: u64 },
    /// Non-blocking connect finished
    ConnectDone {
        key: u64,
        gen: u64,
        result: io::Result<TcpStream>,
    },
    /// Retry timer fired
    RetryConnect { key: u64 },
    /// Queue a keepalive frame for `peer`
    Ping { peer: ProcessName },
    /// Drop the record of `name`
    Forget {
        name: ProcessName,
        reply: oneshot::Sender<bool>,
    },
    /// Report every peer record
    Dump {
        reply: oneshot::Sender<Vec<PeerSnapshot>>,
    },
    /// Tear everything down and stop
    Shutdown { done: oneshot::Sender<()> },
}

impl fmt::Debug for ReactorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorOp::Send { hop, msg } => write!(f, "Send(hop {}, {:?})", hop, msg),
            ReactorOp::Route(msg) => write!(f, "Route({:?})", msg),
            ReactorOp::SetPeer { name, addrs } => write!(f, "SetPeer({}, {:?})", name, addrs),
            ReactorOp::Accept { addr, .. } => write!(f, "Accept({})", addr),
            ReactorOp::PendingReadable { id, timed_out } => {
                write!(f, "PendingReadable({}, timed_out={})", id, timed_out)
            }
            ReactorOp::Readable { key, gen } => write!(f, "Readable({:#x}, {})", key, gen),
            ReactorOp::Writable { key, gen } => write!(f, "Writable({:#x}, {})", key, gen),
            ReactorOp::ConnectDone { key, gen, result } => write!(
                f,
                "ConnectDone({:#x}, {}, ok={})",
                key,
                gen,
                result.is_ok()
            ),
            ReactorOp::RetryConnect { key } => write!(f, "RetryConnect({:#x})", key),
            ReactorOp::Ping { peer } => write!(f, "Ping({})", peer),
            ReactorOp::Forget { name, .. } => write!(f, "Forget({})", name),
            ReactorOp::Dump { .. } => write!(f, "Dump"),
            ReactorOp::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

/// Posts operations into the reactor.
#[derive(Clone)]
pub(crate) struct ReactorHandle {
    tx: mpsc::UnboundedSender<ReactorOp>,
}

impl ReactorHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ReactorOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Defer `op` to the reactor's next iteration. False once the reactor is gone.
    pub(crate) fn schedule(&self, op: ReactorOp) -> bool {
        self.try_schedule(op).is_ok()
    }

    /// Like [`ReactorHandle::schedule`] but hands the operation back on failure.
    pub(crate) fn try_schedule(&self, op: ReactorOp) -> Result<(), ReactorOp> {
        self.tx.send(op).map_err(|e| e.0)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl TransportModule {
    /// Execute operations until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self, mut ops: mpsc::UnboundedReceiver<ReactorOp>) {
        info!(local = %self.local, "reactor started");
        while let Some(op) = ops.recv().await {
            if let ReactorOp::Shutdown { done } = op {
                self.shutdown();
                let _ = done.send(());
                break;
            }
            self.dispatch(op);
        }
        info!(local = %self.local, "reactor stopped");
    }

    pub(crate) fn dispatch(&mut self, op: ReactorOp) {
        debug!(?op, "dispatch");
        match op {
            ReactorOp::Send { hop, msg } => self.queue_send(&hop, msg),
            ReactorOp::Route(msg) => self.route(msg),
            ReactorOp::SetPeer { name, addrs } => self.set_peer(name, addrs),
            ReactorOp::Accept {
                stream,
                addr,
                reply,
            } => self.accept(stream, addr, reply),
            ReactorOp::PendingReadable { id, timed_out } => self.pending_readable(id, timed_out),
            ReactorOp::Readable { key, gen } => self.on_readable(key, gen),
            ReactorOp::Writable { key, gen } => self.on_writable(key, gen),
            ReactorOp::ConnectDone { key, gen, result } => self.connect_done(key, gen, result),
            ReactorOp::RetryConnect { key } => self.retry_connect(key),
            ReactorOp::Ping { peer } => {
                if self.peers.lookup(&peer).is_none() {
                    debug!(%peer, "ping for unknown peer");
                    return;
                }
                let ping = OutboundMessage::ping(self.local.clone(), peer.clone());
                self.queue_send(&peer, ping);
            }
            ReactorOp::Forget { name, reply } => {
                let _ = reply.send(self.forget_peer(&name));
            }
            ReactorOp::Dump { reply } => {
                let mut snapshots: Vec<PeerSnapshot> =
                    self.peers.iter().map(|rec| rec.snapshot()).collect();
                snapshots.sort_by(|a, b| a.name.cmp(&b.name));
                let _ = reply.send(snapshots);
            }
            ReactorOp::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }
}

//! Transport module: the peer table and the send, receive and routing paths
//!
//! Connection setup and teardown live in `connection.rs`.

use crate::component::TransportEvent;
use crate::config::TcpConfig;
use crate::error::is_connection_loss;
use crate::escalation::Escalation;
use crate::handshake::{Authenticator, Credential};
use crate::pending::{PendingRecv, PendingSend, RecvProgress, SendProgress};
use crate::reactor::{AcceptReply, ReactorHandle};
use crate::routing::Topology;
use crate::state::{ConnEvent, ConnState};
use crate::table::PeerTable;
use bytes::Bytes;
use oob_core::{InboundMessage, MessageClass, MessageHeader, OutboundMessage, ProcessName, SendError};
use oob_metrics::{names, Metrics};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Frames handled per readable notification before yielding to other peers.
const RECV_BATCH: usize = 64;

/// Accepted socket waiting for its identification frame.
pub(crate) struct PendingConn {
    pub(crate) socket: Arc<TcpStream>,
    pub(crate) addr: SocketAddr,
    pub(crate) watcher: JoinHandle<()>,
    pub(crate) reply: Option<AcceptReply>,
}

/// State owned by the reactor task.
pub(crate) struct TransportModule {
    pub(crate) config: Arc<TcpConfig>,
    pub(crate) local: ProcessName,
    pub(crate) peers: PeerTable,
    pub(crate) pending: HashMap<u64, PendingConn>,
    pub(crate) next_pending: u64,
    pub(crate) credential: Credential,
    pub(crate) auth: Arc<dyn Authenticator>,
    pub(crate) topology: Arc<dyn Topology>,
    pub(crate) handle: ReactorHandle,
    escalations: mpsc::UnboundedSender<Escalation>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pub(crate) metrics: Arc<Metrics>,
}

impl TransportModule {
    pub(crate) fn new(
        config: Arc<TcpConfig>,
        auth: Arc<dyn Authenticator>,
        topology: Arc<dyn Topology>,
        handle: ReactorHandle,
        escalations: mpsc::UnboundedSender<Escalation>,
        events: mpsc::UnboundedSender<TransportEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let credential = auth.credential();
        debug!(method = %credential.method, "using credential");
        Self {
            local: config.local_name.clone(),
            config,
            peers: PeerTable::new(),
            pending: HashMap::new(),
            next_pending: 0,
            credential,
            auth,
            topology,
            handle,
            escalations,
            events,
            metrics,
        }
    }

    pub(crate) fn escalate(&self, esc: Escalation) {
        if self.escalations.send(esc).is_err() {
            debug!("escalation handler gone");
        }
    }

    fn deliver(&self, msg: InboundMessage) {
        trace!(origin = %msg.origin, tag = msg.tag, len = msg.payload.len(), "delivering");
        if self.events.send(TransportEvent::Message(msg)).is_err() {
            debug!("event receiver dropped, message discarded");
        }
    }

    /// Pick the next hop for `msg` and queue it there.
    pub(crate) fn route(&mut self, mut msg: OutboundMessage) {
        if msg.dst == self.local {
            msg.complete(Ok(()));
            self.deliver(InboundMessage::from(msg));
            return;
        }
        match self.topology.next_hop(&msg.dst) {
            None => self.escalate(Escalation::NoRoute { msg }),
            Some(hop) => self.queue_send(&hop, msg),
        }
    }

    /// Append `msg` to the hop's queue, starting a connection if needed.
    pub(crate) fn queue_send(&mut self, hop: &ProcessName, mut msg: OutboundMessage) {
        let Some(rec) = self.peers.lookup_mut(hop) else {
            self.escalate(Escalation::HopUnknown {
                hop: hop.clone(),
                msg,
            });
            return;
        };
        if rec.state == ConnState::Failed {
            debug!(peer = %hop, "peer failed, refusing message");
            msg.complete(Err(SendError::Unreachable(hop.clone())));
            return;
        }
        if let Err(e) = msg.check_size(self.config.max_msg_size) {
            warn!(peer = %hop, dst = %msg.dst, error = %e, "refusing oversize message");
            msg.complete(Err(e));
            return;
        }
        trace!(peer = %hop, dst = %msg.dst, len = msg.payload.len(), "queueing");
        rec.send_queue.push_back(PendingSend::new(msg));
        let (key, state, idle) = (rec.key(), rec.state, rec.timer.is_none());
        match state {
            ConnState::Connected => rec.arm_send(&self.handle),
            ConnState::Unconnected | ConnState::Closed if idle => self.start_connect(key),
            _ => {}
        }
    }

    /// Record candidate addresses; a failed peer gets another chance.
    pub(crate) fn set_peer(&mut self, name: ProcessName, addrs: Vec<SocketAddr>) {
        let Some(rec) = self.peers.get_or_create(&name) else {
            return;
        };
        let added = rec.add_addresses(&addrs);
        debug!(peer = %name, added, total = rec.addrs.len(), "peer addresses set");
        if rec.state == ConnState::Failed {
            rec.reset_addresses();
            rec.reconnect_attempts = 0;
            rec.apply(ConnEvent::Reset);
        }
    }

    /// Drop everything known about `name`. Queued messages fail as unreachable.
    pub(crate) fn forget_peer(&mut self, name: &ProcessName) -> bool {
        let Some(mut rec) = self.peers.remove(name) else {
            return false;
        };
        if rec.state == ConnState::Connected {
            self.metrics.adjust_gauge(names::PEERS_CONNECTED, -1);
        }
        rec.teardown();
        for mut msg in rec.take_undeliverable() {
            msg.complete(Err(SendError::Unreachable(name.clone())));
        }
        debug!(peer = %name, "peer forgotten");
        true
    }

    /// Writable notification: drain the send queue.
    pub(crate) fn on_writable(&mut self, key: u64, gen: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        rec.send_fired();
        if rec.generation != gen || rec.state != ConnState::Connected {
            return;
        }
        let Some(sock) = rec.socket.clone() else {
            return;
        };

        let mut lost = false;
        loop {
            if rec.send_msg.is_none() {
                rec.send_msg = rec.send_queue.pop_front();
            }
            let Some(pending) = rec.send_msg.as_mut() else {
                break;
            };
            match pending.pump(sock.as_ref()) {
                SendProgress::Complete => {
                    let len = pending.payload_len() as u64;
                    if let Some(done) = rec.send_msg.take() {
                        let mut msg = done.into_message();
                        trace!(peer = %rec.name, dst = %msg.dst, len, "sent");
                        msg.complete(Ok(()));
                    }
                    self.metrics.incr(names::MSGS_SENT);
                    self.metrics.add(names::BYTES_SENT, len);
                }
                SendProgress::WouldBlock => {
                    rec.arm_send(&self.handle);
                    break;
                }
                SendProgress::Failed(e) => {
                    warn!(peer = %rec.name, error = %e, "send failed");
                    // a partly written frame leaves the stream unframed
                    let started = pending.started();
                    if let Some(done) = rec.send_msg.take() {
                        done.into_message().complete(Err(SendError::Io(e.to_string())));
                    }
                    if started || is_connection_loss(&e) {
                        lost = true;
                        break;
                    }
                }
            }
        }
        if lost {
            self.close_peer(key);
        }
    }

    /// Readable notification: finish the handshake or pump inbound frames.
    pub(crate) fn on_readable(&mut self, key: u64, gen: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        rec.recv_fired();
        if rec.generation != gen || rec.socket.is_none() {
            return;
        }
        let state = rec.state;
        match state {
            ConnState::ConnectAck => self.recv_connect_ack(key),
            ConnState::Connected => self.recv_pump(key),
            state => debug!(peer = %rec.name, %state, "readable in unexpected state"),
        }
    }

    fn recv_pump(&mut self, key: u64) {
        let mut frames = Vec::new();
        let mut close = false;
        {
            let Some(rec) = self.peers.get_by_key_mut(key) else {
                return;
            };
            let Some(sock) = rec.socket.clone() else {
                return;
            };
            let max = self.config.max_msg_size;
            let tracker = rec.recv_msg.get_or_insert_with(|| PendingRecv::new(max));
            let mut armed = false;
            while frames.len() < RECV_BATCH {
                match tracker.pump(sock.as_ref()) {
                    RecvProgress::Complete(hdr, payload) => frames.push((hdr, payload)),
                    RecvProgress::WouldBlock => {
                        rec.arm_recv(&self.handle);
                        armed = true;
                        break;
                    }
                    RecvProgress::Closed => {
                        debug!(peer = %rec.name, "remote closed connection");
                        close = true;
                        break;
                    }
                    RecvProgress::Failed(e) => {
                        warn!(peer = %rec.name, error = %e, "receive failed");
                        close = true;
                        break;
                    }
                }
            }
            if !armed && !close {
                // batch limit reached, come back on the next readiness
                rec.arm_recv(&self.handle);
            }
        }

        for (hdr, payload) in frames {
            if !self.dispatch_inbound(key, hdr, payload) {
                close = true;
                break;
            }
        }
        if close {
            self.close_peer(key);
        }
    }

    /// Act on one complete inbound frame. False means the connection must close.
    fn dispatch_inbound(&mut self, key: u64, hdr: MessageHeader, payload: Bytes) -> bool {
        self.metrics.incr(names::MSGS_RECEIVED);
        self.metrics.add(names::BYTES_RECEIVED, payload.len() as u64);
        match hdr.msg_class {
            MessageClass::Ping => {
                trace!(origin = %hdr.origin, "ping");
                true
            }
            MessageClass::Ident | MessageClass::Probe => {
                let peer = self.peers.get_by_key(key).map(|r| r.name.to_string());
                warn!(peer = ?peer, class = ?hdr.msg_class, "handshake frame on established connection");
                false
            }
            MessageClass::User if hdr.dst == self.local => {
                self.deliver(InboundMessage::from_parts(hdr, payload));
                true
            }
            MessageClass::User => {
                debug!(origin = %hdr.origin, dst = %hdr.dst, "relaying");
                self.metrics.incr(names::MSGS_RELAYED);
                self.route(OutboundMessage::relay(&hdr, payload));
                true
            }
        }
    }

    /// Complete everything still queued and drop every connection.
    pub(crate) fn shutdown(&mut self) {
        info!(peers = self.peers.len(), pending = self.pending.len(), "shutting down transport");
        for (_, conn) in self.pending.drain() {
            conn.watcher.abort();
            if let Some(reply) = conn.reply {
                let _ = reply.send(Err(crate::error::TcpError::NotRunning));
            }
        }
        let mut connected = 0;
        for mut rec in self.peers.drain() {
            if rec.state == ConnState::Connected {
                connected += 1;
            }
            rec.teardown();
            for mut msg in rec.take_undeliverable() {
                msg.complete(Err(SendError::Shutdown));
            }
        }
        self.metrics.adjust_gauge(names::PEERS_CONNECTED, -connected);
    }
}

//! Per-peer connection record

use crate::address::{AddressSnapshot, PeerAddress};
use crate::pending::{PendingRecv, PendingSend};
use crate::reactor::{ReactorHandle, ReactorOp};
use crate::state::{ConnEvent, ConnState};
use oob_core::{OutboundMessage, ProcessName};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything the reactor knows about one remote process.
///
/// Only the reactor task touches a record.
pub(crate) struct PeerRecord {
    pub(crate) name: ProcessName,
    pub(crate) socket: Option<Arc<TcpStream>>,
    /// Bumped whenever a new socket or connect attempt is installed
    pub(crate) generation: u64,
    pub(crate) addrs: Vec<PeerAddress>,
    pub(crate) active_addr: Option<usize>,
    pub(crate) state: ConnState,
    pub(crate) reconnect_attempts: u32,
    pub(crate) send_queue: VecDeque<PendingSend>,
    pub(crate) send_msg: Option<PendingSend>,
    pub(crate) recv_msg: Option<PendingRecv>,
    pub(crate) auth_method: Option<String>,
    pub(crate) timer: Option<JoinHandle<()>>,
    pub(crate) connector: Option<JoinHandle<()>>,
    send_ev: Option<JoinHandle<()>>,
    recv_ev: Option<JoinHandle<()>>,
}

impl PeerRecord {
    pub(crate) fn new(name: ProcessName) -> Self {
        Self {
            name,
            socket: None,
            generation: 0,
            addrs: Vec::new(),
            active_addr: None,
            state: ConnState::Unconnected,
            reconnect_attempts: 0,
            send_queue: VecDeque::new(),
            send_msg: None,
            recv_msg: None,
            auth_method: None,
            timer: None,
            connector: None,
            send_ev: None,
            recv_ev: None,
        }
    }

    pub(crate) fn key(&self) -> u64 {
        self.name.key()
    }

    /// Run the state machine. The active address follows the peer into
    /// connecting, acknowledged, connected and closed states.
    pub(crate) fn apply(&mut self, event: ConnEvent) -> bool {
        match self.state.on(event) {
            Ok(next) => {
                debug!(peer = %self.name, from = %self.state, to = %next, ?event, "state change");
                self.state = next;
                if matches!(
                    next,
                    ConnState::Connecting
                        | ConnState::ConnectAck
                        | ConnState::Connected
                        | ConnState::Closed
                ) {
                    if let Some(addr) = self.active_addr.and_then(|i| self.addrs.get_mut(i)) {
                        addr.state = next;
                    }
                }
                true
            }
            Err(e) => {
                warn!(peer = %self.name, error = %e, "ignoring event");
                false
            }
        }
    }

    pub(crate) fn active_address(&mut self) -> Option<&mut PeerAddress> {
        self.active_addr.and_then(|i| self.addrs.get_mut(i))
    }

    /// Add endpoints not yet known. Returns how many were new.
    pub(crate) fn add_addresses(&mut self, addrs: &[SocketAddr]) -> usize {
        let mut added = 0;
        for addr in addrs {
            if !self.addrs.iter().any(|a| a.addr == *addr) {
                self.addrs.push(PeerAddress::new(*addr));
                added += 1;
            }
        }
        added
    }

    /// First address still worth dialing, in list order.
    pub(crate) fn next_viable_address(&self, max_retries: u32) -> Option<usize> {
        self.addrs.iter().position(|a| a.is_viable(max_retries))
    }

    pub(crate) fn reset_addresses(&mut self) {
        for addr in &mut self.addrs {
            addr.reset();
        }
    }

    /// Watch for writability once; the watcher posts `Writable`.
    pub(crate) fn arm_send(&mut self, handle: &ReactorHandle) {
        if self.send_ev.is_some() {
            return;
        }
        let Some(sock) = self.socket.clone() else {
            return;
        };
        let (key, gen) = (self.key(), self.generation);
        let handle = handle.clone();
        self.send_ev = Some(tokio::spawn(async move {
            if let Err(e) = sock.writable().await {
                debug!(error = %e, "writable wait failed");
            }
            handle.schedule(ReactorOp::Writable { key, gen });
        }));
    }

    /// Watch for readability once; the watcher posts `Readable`.
    pub(crate) fn arm_recv(&mut self, handle: &ReactorHandle) {
        if self.recv_ev.is_some() {
            return;
        }
        let Some(sock) = self.socket.clone() else {
            return;
        };
        let (key, gen) = (self.key(), self.generation);
        let handle = handle.clone();
        self.recv_ev = Some(tokio::spawn(async move {
            if let Err(e) = sock.readable().await {
                debug!(error = %e, "readable wait failed");
            }
            handle.schedule(ReactorOp::Readable { key, gen });
        }));
    }

    /// The send watcher fired and is gone.
    pub(crate) fn send_fired(&mut self) {
        self.send_ev = None;
    }

    /// The receive watcher fired and is gone.
    pub(crate) fn recv_fired(&mut self) {
        self.recv_ev = None;
    }

    /// Arm a retry. A zero delay posts the retry right away.
    pub(crate) fn schedule_retry(&mut self, handle: &ReactorHandle, delay: Duration) {
        self.cancel_timer();
        let key = self.key();
        if delay.is_zero() {
            handle.schedule(ReactorOp::RetryConnect { key });
            return;
        }
        let handle = handle.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.schedule(ReactorOp::RetryConnect { key });
        }));
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Stop watching the socket, abort any connect in progress and drop the socket.
    pub(crate) fn teardown(&mut self) {
        for task in [
            self.send_ev.take(),
            self.recv_ev.take(),
            self.connector.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.cancel_timer();
        self.socket = None;
        self.recv_msg = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Put a half-written message back at the head of the queue.
    pub(crate) fn requeue_inflight(&mut self) {
        if let Some(mut pending) = self.send_msg.take() {
            pending.restart();
            self.send_queue.push_front(pending);
        }
    }

    /// Every message still owned by this peer, in send order.
    pub(crate) fn take_undeliverable(&mut self) -> Vec<OutboundMessage> {
        self.requeue_inflight();
        self.send_queue
            .drain(..)
            .map(PendingSend::into_message)
            .collect()
    }

    pub(crate) fn has_work(&self) -> bool {
        self.send_msg.is_some() || !self.send_queue.is_empty()
    }

    pub(crate) fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            name: self.name.clone(),
            state: self.state,
            addresses: self.addrs.iter().map(PeerAddress::snapshot).collect(),
            active_addr: self.active_addr.and_then(|i| self.addrs.get(i)).map(|a| a.addr),
            connected: self.socket.is_some(),
            queued: self.send_queue.len(),
            sending: self.send_msg.as_ref().is_some_and(PendingSend::started),
            receiving: self.recv_msg.as_ref().is_some_and(PendingRecv::in_progress),
            reconnect_attempts: self.reconnect_attempts,
            retry_pending: self.timer.is_some(),
            auth_method: self.auth_method.clone(),
        }
    }
}

impl Drop for PeerRecord {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Diagnostic view of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    /// Peer identity
    pub name: ProcessName,
    /// Connection state
    pub state: ConnState,
    /// Candidate addresses
    pub addresses: Vec<AddressSnapshot>,
    /// Address in use, if the connection was dialed by us
    pub active_addr: Option<SocketAddr>,
    /// A socket is attached
    pub connected: bool,
    /// Messages waiting behind the in-flight one
    pub queued: usize,
    /// A message is partially written
    pub sending: bool,
    /// A frame is partially read
    pub receiving: bool,
    /// Completed rounds over all addresses
    pub reconnect_attempts: u32,
    /// A retry timer is armed
    pub retry_pending: bool,
    /// Method that authenticated the peer
    pub auth_method: Option<String>,
}

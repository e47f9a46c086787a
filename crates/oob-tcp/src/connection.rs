//! Connection lifecycle: dialing, accepting, the handshake and teardown

use crate::error::{HandshakeRejection, TcpError, TcpResult};
use crate::escalation::Escalation;
use crate::handshake::{ident_frame, read_frame, validate_ident, write_all_spin};
use crate::module::{PendingConn, TransportModule};
use crate::reactor::{AcceptReply, ReactorOp};
use crate::socket::{self, RawSocket};
use crate::state::{resolve_race, ConnEvent, ConnState, RaceOutcome};
use oob_core::{MessageClass, MessageHeader, ProcessName, SendError};
use oob_metrics::{names, timed};
use socket2::SockRef;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// What became of an inbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Handshake completed; the peer is connected over this socket
    Accepted(ProcessName),
    /// The remote only probed us; our identity was echoed and the socket closed
    Echoed,
    /// Both sides dialed and our own connection to this peer wins
    RejectedRace(ProcessName),
}

impl TransportModule {
    /// A send needs a connection: leave `Unconnected`/`Closed` and dial.
    pub(crate) fn start_connect(&mut self, key: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        if !rec.apply(ConnEvent::ConnectRequested) {
            return;
        }
        debug!(peer = %rec.name, addresses = rec.addrs.len(), "starting connect");
        self.try_connect(key);
    }

    /// Dial the first viable address, skipping ones whose socket cannot be created.
    pub(crate) fn try_connect(&mut self, key: u64) {
        loop {
            let Some(rec) = self.peers.get_by_key_mut(key) else {
                return;
            };
            rec.teardown();
            let Some(idx) = rec.next_viable_address(self.config.max_retries) else {
                break;
            };
            let addr = rec.addrs[idx].addr;
            rec.active_addr = Some(idx);
            match socket::connect_socket(&addr, &self.config) {
                Ok(socket) => {
                    rec.apply(ConnEvent::ConnectStarted);
                    debug!(peer = %rec.name, %addr, "connecting");
                    let gen = rec.generation;
                    let handle = self.handle.clone();
                    rec.connector = Some(tokio::spawn(async move {
                        let result = socket.connect(addr).await;
                        handle.schedule(ReactorOp::ConnectDone { key, gen, result });
                    }));
                    return;
                }
                Err(e) => {
                    warn!(peer = %rec.name, %addr, error = %e, "socket creation failed");
                    rec.addrs[idx].state = ConnState::Failed;
                    self.metrics.incr(names::CONNECT_FAILURES);
                }
            }
        }
        self.addresses_exhausted(key);
    }

    /// Every address failed: start another round after `retry_delay` or give up.
    fn addresses_exhausted(&mut self, key: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        rec.active_addr = None;
        let config = &self.config;
        let can_retry = !config.retry_delay.is_zero()
            && !rec.addrs.is_empty()
            && config
                .max_reconnect_attempts
                .map_or(true, |max| rec.reconnect_attempts < max);
        if can_retry {
            rec.reset_addresses();
            rec.reconnect_attempts += 1;
            rec.apply(ConnEvent::RetryScheduled);
            info!(
                peer = %rec.name,
                attempt = rec.reconnect_attempts,
                delay_ms = config.retry_delay.as_millis() as u64,
                "all addresses failed, retrying"
            );
            rec.schedule_retry(&self.handle, config.retry_delay);
            return;
        }

        rec.apply(ConnEvent::Exhausted);
        let undeliverable = rec.take_undeliverable();
        let peer = rec.name.clone();
        warn!(%peer, undeliverable = undeliverable.len(), "unable to connect");
        self.escalate(Escalation::FailedToConnect {
            peer,
            undeliverable,
        });
    }

    /// The connect task finished.
    pub(crate) fn connect_done(&mut self, key: u64, gen: u64, result: io::Result<TcpStream>) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        if rec.generation != gen || rec.state != ConnState::Connecting {
            debug!(peer = %rec.name, "stale connect completion");
            return;
        }
        rec.connector = None;
        let max_retries = self.config.max_retries;

        match result {
            Ok(stream) => {
                let frame = ident_frame(
                    &self.local,
                    &rec.name,
                    &self.config.version,
                    &self.credential.bytes,
                );
                let written = timed!(self.metrics, names::HANDSHAKE_US, {
                    write_all_spin(&RawSocket::new(&stream), &frame, self.config.handshake_timeout)
                });
                match written {
                    Ok(()) => {
                        rec.socket = Some(Arc::new(stream));
                        rec.apply(ConnEvent::ConnectEstablished);
                        rec.arm_recv(&self.handle);
                        debug!(peer = %rec.name, "identification sent, awaiting reply");
                    }
                    Err(e) => {
                        warn!(peer = %rec.name, error = %e, "failed to send identification");
                        if let Some(addr) = rec.active_address() {
                            addr.state = ConnState::Failed;
                        }
                        self.metrics.incr(names::CONNECT_FAILURES);
                        self.try_connect(key);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                if let Some(addr) = rec.active_address() {
                    addr.retries += 1;
                    debug!(addr = %addr.addr, retries = addr.retries, "connect aborted");
                    if addr.retries > max_retries {
                        addr.state = ConnState::Failed;
                    }
                }
                self.try_connect(key);
            }
            Err(e) => {
                if let Some(addr) = rec.active_address() {
                    debug!(addr = %addr.addr, error = %e, "connect failed");
                    addr.state = ConnState::Failed;
                }
                self.metrics.incr(names::CONNECT_FAILURES);
                self.try_connect(key);
            }
        }
    }

    /// Read and check the acceptor's identification.
    pub(crate) fn recv_connect_ack(&mut self, key: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        let Some(sock) = rec.socket.clone() else {
            return;
        };
        let frame = timed!(self.metrics, names::HANDSHAKE_US, {
            read_frame(&RawSocket::new(&sock), self.config.handshake_timeout)
        });
        let verdict = frame.and_then(|(hdr, payload)| {
            validate_ident(
                &hdr,
                &payload,
                &self.config.version,
                self.auth.as_ref(),
                &self.local,
                Some(&rec.name),
            )
            .map_err(TcpError::from)
        });

        match verdict {
            Ok(method) => {
                rec.auth_method = Some(method.clone());
                rec.apply(ConnEvent::HandshakeComplete);
                rec.reconnect_attempts = 0;
                if let Some(addr) = rec.active_address() {
                    addr.retries = 0;
                }
                rec.arm_recv(&self.handle);
                if rec.has_work() {
                    rec.arm_send(&self.handle);
                }
                let peer = rec.name.clone();
                info!(%peer, %method, "connected");
                self.metrics.incr(names::CONNECTS);
                self.metrics.adjust_gauge(names::PEERS_CONNECTED, 1);
                self.escalate(Escalation::PeerReachable { peer });
            }
            Err(TcpError::Refused(reason)) => {
                warn!(peer = %rec.name, %reason, "handshake rejected");
                self.metrics.incr(names::HANDSHAKE_REJECTIONS);
                self.reject_peer(key);
            }
            Err(e) => {
                debug!(peer = %rec.name, error = %e, "no identification reply");
                self.close_peer(key);
            }
        }
    }

    /// Hard handshake rejection: the peer fails and its queue is flushed.
    fn reject_peer(&mut self, key: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        rec.teardown();
        if let Some(addr) = rec.active_address() {
            addr.state = ConnState::Failed;
        }
        rec.apply(ConnEvent::Rejected);
        let undeliverable = rec.take_undeliverable();
        let peer = rec.name.clone();
        self.escalate(Escalation::FailedToConnect {
            peer,
            undeliverable,
        });
    }

    /// Drop the connection to a peer and decide what happens next.
    pub(crate) fn close_peer(&mut self, key: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        let prior = rec.state;
        rec.teardown();
        match prior {
            ConnState::Connecting => {
                if let Some(addr) = rec.active_address() {
                    addr.state = ConnState::Failed;
                }
                self.metrics.incr(names::CONNECT_FAILURES);
                self.try_connect(key);
            }
            ConnState::ConnectAck => {
                // our attempt lost the race or the acceptor hung up: retry later
                let max_retries = self.config.max_retries;
                if let Some(addr) = rec.active_address() {
                    addr.retries += 1;
                    addr.state = if addr.retries > max_retries {
                        ConnState::Failed
                    } else {
                        ConnState::Unconnected
                    };
                    debug!(addr = %addr.addr, retries = addr.retries, "no identification reply");
                }
                rec.apply(ConnEvent::RetryScheduled);
                rec.schedule_retry(&self.handle, self.config.retry_delay);
            }
            ConnState::Connected | ConnState::Accepting => {
                rec.apply(ConnEvent::Lost);
                let requeue = rec.take_undeliverable();
                let peer = rec.name.clone();
                warn!(%peer, requeued = requeue.len(), "connection lost");
                self.metrics.incr(names::LOST_CONNECTIONS);
                if prior == ConnState::Connected {
                    self.metrics.adjust_gauge(names::PEERS_CONNECTED, -1);
                }
                self.escalate(Escalation::LostConnection { peer });
                for msg in requeue {
                    if let Err(ReactorOp::Route(mut msg)) =
                        self.handle.try_schedule(ReactorOp::Route(msg))
                    {
                        msg.complete(Err(SendError::Shutdown));
                    }
                }
            }
            _ => {}
        }
    }

    /// Retry timer fired.
    pub(crate) fn retry_connect(&mut self, key: u64) {
        let Some(rec) = self.peers.get_by_key_mut(key) else {
            return;
        };
        rec.timer = None;
        if rec.state == ConnState::Unconnected && rec.has_work() {
            self.start_connect(key);
        }
    }

    /// Take over an inbound socket and wait for its identification frame.
    pub(crate) fn accept(
        &mut self,
        stream: std::net::TcpStream,
        addr: SocketAddr,
        reply: Option<AcceptReply>,
    ) {
        socket::set_options(SockRef::from(&stream), &self.config);
        let sock = match stream
            .set_nonblocking(true)
            .and_then(|()| TcpStream::from_std(stream))
        {
            Ok(sock) => Arc::new(sock),
            Err(e) => {
                warn!(%addr, error = %e, "cannot register accepted socket");
                answer(reply, addr, Err(e.into()));
                return;
            }
        };

        let id = self.next_pending;
        self.next_pending += 1;
        let timeout = self.config.handshake_timeout;
        let handle = self.handle.clone();
        let waiting = sock.clone();
        let watcher = tokio::spawn(async move {
            let timed_out = tokio::time::timeout(timeout, waiting.readable())
                .await
                .is_err();
            handle.schedule(ReactorOp::PendingReadable { id, timed_out });
        });
        debug!(%addr, id, "accepted connection awaiting identification");
        self.pending.insert(
            id,
            PendingConn {
                socket: sock,
                addr,
                watcher,
                reply,
            },
        );
    }

    /// The identification of an accepted socket is readable, or never came.
    pub(crate) fn pending_readable(&mut self, id: u64, timed_out: bool) {
        let Some(conn) = self.pending.remove(&id) else {
            return;
        };
        let result = if timed_out {
            Err(TcpError::Timeout(format!(
                "no identification from {}",
                conn.addr
            )))
        } else {
            self.process_incoming(conn.socket, conn.addr)
        };
        answer(conn.reply, conn.addr, result);
    }

    /// Validate an inbound identification and install the socket on its peer.
    pub(crate) fn process_incoming(
        &mut self,
        sock: Arc<TcpStream>,
        addr: SocketAddr,
    ) -> TcpResult<AcceptOutcome> {
        let timeout = self.config.handshake_timeout;
        let (hdr, payload) = timed!(self.metrics, names::HANDSHAKE_US, {
            read_frame(&RawSocket::new(&sock), timeout)
        })?;

        if hdr.msg_class == MessageClass::Probe {
            let echo = MessageHeader::new(
                self.local.clone(),
                hdr.origin.clone(),
                MessageClass::Probe,
                0,
                0,
                0,
            );
            write_all_spin(&RawSocket::new(&sock), &echo.to_network(), timeout)?;
            debug!(%addr, prober = %hdr.origin, "answered probe");
            return Ok(AcceptOutcome::Echoed);
        }

        let method = match validate_ident(
            &hdr,
            &payload,
            &self.config.version,
            self.auth.as_ref(),
            &self.local,
            None,
        ) {
            Ok(method) => method,
            Err(reason) => {
                warn!(%addr, origin = %hdr.origin, %reason, "refusing connection");
                self.metrics.incr(names::HANDSHAKE_REJECTIONS);
                // a live connection is left alone
                let known = self
                    .peers
                    .lookup(&hdr.origin)
                    .filter(|rec| !matches!(rec.state, ConnState::Connected | ConnState::Failed))
                    .map(|rec| rec.key());
                if let Some(key) = known {
                    self.reject_peer(key);
                }
                return Err(reason.into());
            }
        };

        let peer = hdr.origin;
        let Some(rec) = self.peers.get_or_create(&peer) else {
            return Err(HandshakeRejection::UnexpectedPeer {
                expected: "an identity with a free table slot".into(),
                got: peer.to_string(),
            }
            .into());
        };

        let prior = rec.state;
        match resolve_race(prior, &self.local, &peer) {
            RaceOutcome::RejectIncoming => {
                debug!(%peer, state = %prior, "keeping our connection, closing inbound");
                return Ok(AcceptOutcome::RejectedRace(peer));
            }
            RaceOutcome::AbandonOwn => {
                debug!(%peer, state = %prior, "abandoning our connection for inbound");
                rec.teardown();
                rec.requeue_inflight();
                rec.apply(ConnEvent::Abandoned);
                if prior == ConnState::Connected {
                    self.metrics.adjust_gauge(names::PEERS_CONNECTED, -1);
                }
            }
            RaceOutcome::NoConflict => rec.cancel_timer(),
        }

        rec.apply(ConnEvent::Accepted);
        rec.teardown();
        rec.socket = Some(sock.clone());
        rec.active_addr = None;

        let frame = ident_frame(
            &self.local,
            &peer,
            &self.config.version,
            &self.credential.bytes,
        );
        if let Err(e) = write_all_spin(&RawSocket::new(&sock), &frame, timeout) {
            warn!(%peer, error = %e, "failed to answer identification");
            rec.teardown();
            rec.apply(ConnEvent::Lost);
            return Err(e);
        }

        rec.auth_method = Some(method.clone());
        rec.apply(ConnEvent::HandshakeComplete);
        rec.reconnect_attempts = 0;
        rec.reset_addresses();
        rec.arm_recv(&self.handle);
        if rec.has_work() {
            rec.arm_send(&self.handle);
        }
        info!(%peer, %addr, %method, "accepted");
        self.metrics.incr(names::CONNECTS);
        self.metrics.adjust_gauge(names::PEERS_CONNECTED, 1);
        self.escalate(Escalation::PeerReachable { peer: peer.clone() });
        Ok(AcceptOutcome::Accepted(peer))
    }
}

fn answer(reply: Option<AcceptReply>, addr: SocketAddr, result: TcpResult<AcceptOutcome>) {
    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => match result {
            Ok(outcome) => debug!(%addr, ?outcome, "inbound connection handled"),
            Err(e) => warn!(%addr, error = %e, "inbound connection dropped"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcpConfig;
    use crate::module::testing::{harness, harness_with, name};
    use crate::routing::DirectTopology;
    use bytes::Bytes;
    use oob_core::OutboundMessage;
    use std::time::Duration;

    #[tokio::test]
    async fn test_no_addresses_fails_immediately() {
        let mut h = harness(Arc::new(DirectTopology));
        h.module.set_peer(name(1), vec![]);
        let (msg, _receipt) =
            OutboundMessage::new(name(0), name(1), 7, Bytes::new()).with_completion();
        h.module.route(msg);

        assert_eq!(
            h.module.peers.lookup(&name(1)).unwrap().state,
            ConnState::Failed
        );
        match h.escalations.try_recv() {
            Ok(Escalation::FailedToConnect {
                peer,
                undeliverable,
            }) => {
                assert_eq!(peer, name(1));
                assert_eq!(undeliverable.len(), 1);
                assert_eq!(undeliverable[0].tag, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_started_on_first_send() {
        let mut h = harness(Arc::new(DirectTopology));
        h.module
            .set_peer(name(1), vec!["127.0.0.1:9".parse().unwrap()]);
        h.module
            .route(OutboundMessage::new(name(0), name(1), 0, Bytes::new()));
        let rec = h.module.peers.lookup(&name(1)).unwrap();
        assert_eq!(rec.state, ConnState::Connecting);
        assert_eq!(rec.active_addr, Some(0));
        assert_eq!(rec.addrs[0].state, ConnState::Connecting);
        assert!(rec.connector.is_some());
    }

    #[tokio::test]
    async fn test_stale_connect_done_ignored() {
        let mut h = harness(Arc::new(DirectTopology));
        h.module
            .set_peer(name(1), vec!["127.0.0.1:9".parse().unwrap()]);
        h.module
            .route(OutboundMessage::new(name(0), name(1), 0, Bytes::new()));
        let key = name(1).key();
        let gen = h.module.peers.get_by_key(key).unwrap().generation;
        h.module.connect_done(
            key,
            gen.wrapping_sub(1),
            Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        );
        let rec = h.module.peers.get_by_key(key).unwrap();
        assert_eq!(rec.state, ConnState::Connecting);
        assert_eq!(rec.addrs[0].state, ConnState::Connecting);
    }

    #[tokio::test]
    async fn test_refused_addresses_exhaust_without_retry_delay() {
        let config = TcpConfig::new(name(0)).with_retry_delay(Duration::ZERO);
        let mut h = harness_with(config, Arc::new(DirectTopology));
        h.module.set_peer(
            name(1),
            vec!["127.0.0.1:9".parse().unwrap(), "127.0.0.1:10".parse().unwrap()],
        );
        h.module
            .route(OutboundMessage::new(name(0), name(1), 0, Bytes::new()));
        let key = name(1).key();
        for _ in 0..2 {
            let gen = h.module.peers.get_by_key(key).unwrap().generation;
            h.module.connect_done(
                key,
                gen,
                Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            );
        }
        let rec = h.module.peers.get_by_key(key).unwrap();
        assert_eq!(rec.state, ConnState::Failed);
        assert!(rec.addrs.iter().all(|a| a.state == ConnState::Failed));
        assert!(matches!(
            h.escalations.try_recv(),
            Ok(Escalation::FailedToConnect { .. })
        ));
        assert!(h.escalations.try_recv().is_err());
        assert_eq!(h.module.metrics.counter(names::CONNECT_FAILURES), Some(2));
    }

    #[tokio::test]
    async fn test_exhaustion_schedules_retry_round() {
        let config = TcpConfig::new(name(0))
            .with_retry_delay(Duration::from_secs(60))
            .with_max_reconnect_attempts(Some(1));
        let mut h = harness_with(config, Arc::new(DirectTopology));
        h.module
            .set_peer(name(1), vec!["127.0.0.1:9".parse().unwrap()]);
        h.module
            .route(OutboundMessage::new(name(0), name(1), 0, Bytes::new()));
        let key = name(1).key();
        let gen = h.module.peers.get_by_key(key).unwrap().generation;
        h.module.connect_done(
            key,
            gen,
            Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        );

        let rec = h.module.peers.get_by_key(key).unwrap();
        assert_eq!(rec.state, ConnState::Unconnected);
        assert_eq!(rec.reconnect_attempts, 1);
        assert!(rec.timer.is_some());
        assert_eq!(rec.addrs[0].state, ConnState::Unconnected);
        assert_eq!(rec.send_queue.len(), 1);
        assert!(h.escalations.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_aborted_connect_retries_same_address() {
        let config = TcpConfig::new(name(0)).with_max_retries(1);
        let mut h = harness_with(config, Arc::new(DirectTopology));
        h.module.set_peer(
            name(1),
            vec!["127.0.0.1:9".parse().unwrap(), "127.0.0.1:10".parse().unwrap()],
        );
        h.module
            .route(OutboundMessage::new(name(0), name(1), 0, Bytes::new()));
        let key = name(1).key();
        let aborted = || Err(io::Error::from(io::ErrorKind::ConnectionAborted));

        let gen = h.module.peers.get_by_key(key).unwrap().generation;
        h.module.connect_done(key, gen, aborted());
        let rec = h.module.peers.get_by_key(key).unwrap();
        assert_eq!(rec.active_addr, Some(0));
        assert_eq!(rec.addrs[0].retries, 1);

        let gen = rec.generation;
        h.module.connect_done(key, gen, aborted());
        let rec = h.module.peers.get_by_key(key).unwrap();
        assert_eq!(rec.addrs[0].state, ConnState::Failed);
        assert_eq!(rec.active_addr, Some(1));
    }

    #[tokio::test]
    async fn test_close_in_connect_ack_schedules_retry() {
        let config = TcpConfig::new(name(0)).with_retry_delay(Duration::from_secs(60));
        let mut h = harness_with(config, Arc::new(DirectTopology));
        h.module
            .set_peer(name(1), vec!["127.0.0.1:9".parse().unwrap()]);
        let key = name(1).key();
        {
            let rec = h.module.peers.get_by_key_mut(key).unwrap();
            rec.active_addr = Some(0);
            rec.apply(ConnEvent::ConnectRequested);
            rec.apply(ConnEvent::ConnectStarted);
            rec.apply(ConnEvent::ConnectEstablished);
        }
        h.module.close_peer(key);
        let rec = h.module.peers.get_by_key(key).unwrap();
        assert_eq!(rec.state, ConnState::Unconnected);
        assert_eq!(rec.addrs[0].retries, 1);
        assert_eq!(rec.addrs[0].state, ConnState::Unconnected);
        assert!(rec.timer.is_some());
    }

    #[tokio::test]
    async fn test_silent_acceptor_eventually_fails() {
        let config = TcpConfig::new(name(0))
            .with_max_retries(1)
            .with_retry_delay(Duration::from_secs(60))
            .with_max_reconnect_attempts(Some(0));
        let mut h = harness_with(config, Arc::new(DirectTopology));
        h.module
            .set_peer(name(1), vec!["127.0.0.1:9".parse().unwrap()]);
        h.module
            .route(OutboundMessage::new(name(0), name(1), 4, Bytes::new()));
        let key = name(1).key();

        // the TCP connect succeeds every time, the identification reply never comes
        for attempt in 1..=2u32 {
            let rec = h.module.peers.get_by_key_mut(key).unwrap();
            assert_eq!(rec.state, ConnState::Connecting);
            rec.apply(ConnEvent::ConnectEstablished);
            h.module.close_peer(key);

            let rec = h.module.peers.get_by_key(key).unwrap();
            assert_eq!(rec.state, ConnState::Unconnected);
            assert_eq!(rec.addrs[0].retries, attempt);
            assert!(h.escalations.try_recv().is_err());
            h.module.retry_connect(key);
        }

        let rec = h.module.peers.get_by_key(key).unwrap();
        assert_eq!(rec.state, ConnState::Failed);
        match h.escalations.try_recv() {
            Ok(Escalation::FailedToConnect {
                peer,
                undeliverable,
            }) => {
                assert_eq!(peer, name(1));
                assert_eq!(undeliverable.len(), 1);
                assert_eq!(undeliverable[0].tag, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_connected_requeues_and_escalates_once() {
        let mut h = harness(Arc::new(DirectTopology));
        h.module.set_peer(name(1), vec![]);
        let key = name(1).key();
        {
            let rec = h.module.peers.get_by_key_mut(key).unwrap();
            rec.apply(ConnEvent::Accepted);
            rec.apply(ConnEvent::HandshakeComplete);
            rec.send_queue
                .push_back(crate::pending::PendingSend::new(OutboundMessage::new(
                    name(0),
                    name(1),
                    3,
                    Bytes::new(),
                )));
        }
        h.module.close_peer(key);
        h.module.close_peer(key);

        assert_eq!(
            h.module.peers.get_by_key(key).unwrap().state,
            ConnState::Closed
        );
        assert!(matches!(
            h.escalations.try_recv(),
            Ok(Escalation::LostConnection { peer }) if peer == name(1)
        ));
        assert!(h.escalations.try_recv().is_err());
        assert!(matches!(
            h.ops.try_recv(),
            Ok(ReactorOp::Route(msg)) if msg.tag == 3
        ));
        assert_eq!(h.module.metrics.counter(names::LOST_CONNECTIONS), Some(1));
    }
}

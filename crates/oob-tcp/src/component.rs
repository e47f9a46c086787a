//! Public face of the transport

use crate::address::{parse_ports, resolve_candidates};
use crate::config::{AddressFamily, TcpConfig};
use crate::connection::AcceptOutcome;
use crate::error::{TcpError, TcpResult};
use crate::escalation::{Escalation, EscalationHandler};
use crate::listener::ListenerSet;
use crate::module::TransportModule;
use crate::peer::PeerSnapshot;
use crate::reachable::ReachabilityMap;
use crate::reactor::{ReactorHandle, ReactorOp};
use crate::routing::Collaborators;
use oob_core::{InboundMessage, OutboundMessage, ProcessName, SendError};
use oob_metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Notifications for the owner of the component.
#[derive(Debug)]
pub enum TransportEvent {
    /// A message addressed to this process arrived
    Message(InboundMessage),
    /// Handshake with a peer completed
    PeerConnected(ProcessName),
    /// An established connection dropped
    PeerLost(ProcessName),
    /// A peer could not be reached on any address
    PeerUnreachable(ProcessName),
}

enum ReactorTask {
    Thread(std::thread::JoinHandle<()>),
    Task(JoinHandle<()>),
}

/// TCP out-of-band transport.
///
/// ```ignore
/// let config = TcpConfig::new(ProcessName::new("job", 0)?);
/// let collab = Collaborators::new(Arc::new(DirectTopology), framework);
/// let mut tcp = TcpComponent::init(config, collab).await?;
/// let mut events = tcp.take_events().unwrap();
///
/// tcp.set_peer_address(peer.clone(), AddressFamily::Ipv4, "10.0.0.2", "5000").await?;
/// tcp.send(OutboundMessage::new(tcp.local_name().clone(), peer, 1, payload))?;
///
/// while let Some(event) = events.recv().await { /* ... */ }
/// tcp.finalize().await?;
/// ```
pub struct TcpComponent {
    config: Arc<TcpConfig>,
    handle: ReactorHandle,
    escalations: EscalationHandler,
    collaborators: Collaborators,
    reachability: ReachabilityMap,
    metrics: Arc<Metrics>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    contact: Vec<SocketAddr>,
    uri: String,
    listener_tasks: Vec<JoinHandle<()>>,
    escalation_task: Option<JoinHandle<()>>,
    reactor: Option<ReactorTask>,
}

impl TcpComponent {
    /// Bind listeners and start the reactor.
    pub async fn init(config: TcpConfig, collaborators: Collaborators) -> TcpResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let listeners = ListenerSet::bind(&config).await?;
        let contact = listeners.contact_addrs();
        let uri = listeners.uri();

        let metrics = Metrics::shared();
        let reachability = ReachabilityMap::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let escalations = EscalationHandler::new(
            reachability.clone(),
            config.transport_index,
            collaborators.clone(),
            event_tx.clone(),
        );
        let (esc_tx, esc_rx) = mpsc::unbounded_channel();
        let escalation_task = tokio::spawn(escalations.clone().run(esc_rx));

        let (handle, ops) = ReactorHandle::channel();
        let module = TransportModule::new(
            config.clone(),
            collaborators.authenticator.clone(),
            collaborators.topology.clone(),
            handle.clone(),
            esc_tx,
            event_tx,
            metrics.clone(),
        );
        let reactor = if config.progress_thread {
            let thread = std::thread::Builder::new()
                .name(format!("oob-tcp-{}", config.transport_index))
                .spawn(move || {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt.block_on(module.run(ops)),
                        Err(e) => error!(error = %e, "failed to build reactor runtime"),
                    }
                })?;
            ReactorTask::Thread(thread)
        } else {
            ReactorTask::Task(tokio::spawn(module.run(ops)))
        };

        let listener_tasks = listeners
            .into_listeners()
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, handle.clone())))
            .collect();

        info!(
            local = %config.local_name,
            %uri,
            progress_thread = config.progress_thread,
            "TCP transport initialized"
        );
        Ok(Self {
            config,
            handle,
            escalations,
            collaborators,
            reachability,
            metrics,
            events: Some(event_rx),
            contact,
            uri,
            listener_tasks,
            escalation_task: Some(escalation_task),
            reactor: Some(reactor),
        })
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    /// This process's identity
    pub fn local_name(&self) -> &ProcessName {
        &self.config.local_name
    }

    /// Active configuration
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Contact string for other processes, e.g. `tcp://10.0.0.1:5000`
    pub fn contact_uri(&self) -> &str {
        &self.uri
    }

    /// Addresses the listeners are bound to
    pub fn contact_addrs(&self) -> &[SocketAddr] {
        &self.contact
    }

    /// Shared per-peer reachability bits
    pub fn reachability(&self) -> &ReachabilityMap {
        &self.reachability
    }

    /// Transport statistics
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Send a message towards its destination.
    ///
    /// The result only says whether the message was handed to the transport.
    /// Delivery is reported through the message's completion, if it has one.
    pub fn send(&self, mut msg: OutboundMessage) -> TcpResult<()> {
        if &msg.dst == self.local_name() {
            msg.complete(Ok(()));
            self.escalations
                .emit(TransportEvent::Message(InboundMessage::from(msg)));
            return Ok(());
        }
        let Some(hop) = self.collaborators.topology.next_hop(&msg.dst) else {
            self.escalations.handle(Escalation::NoRoute { msg });
            return Ok(());
        };
        match self.handle.try_schedule(ReactorOp::Send { hop, msg }) {
            Ok(()) => Ok(()),
            Err(op) => {
                if let ReactorOp::Send { mut msg, .. } = op {
                    msg.complete(Err(SendError::Shutdown));
                }
                Err(TcpError::NotRunning)
            }
        }
    }

    /// Record where `name` can be reached. `ports` is a comma-separated list.
    ///
    /// No connection is made until something is sent. Returns the number of
    /// addresses handed to the reactor; addresses of a disabled family are ignored.
    pub async fn set_peer_address(
        &self,
        name: ProcessName,
        family: AddressFamily,
        host: &str,
        ports: &str,
    ) -> TcpResult<usize> {
        if !self.config.family_enabled(family) {
            debug!(peer = %name, family = family.scheme(), "family disabled, ignoring address");
            return Ok(0);
        }
        let ports = parse_ports(ports)?;
        let addrs = resolve_candidates(family, host, &ports).await?;
        let count = addrs.len();
        debug!(peer = %name, ?addrs, "peer address set");
        self.reachability.set(&name, self.config.transport_index);
        if !self.handle.schedule(ReactorOp::SetPeer { name, addrs }) {
            return Err(TcpError::NotRunning);
        }
        Ok(count)
    }

    /// Hand an inbound connection to the transport and wait for its handshake.
    pub async fn accept_connection(
        &self,
        stream: std::net::TcpStream,
        addr: SocketAddr,
    ) -> TcpResult<AcceptOutcome> {
        let (tx, rx) = oneshot::channel();
        let op = ReactorOp::Accept {
            stream,
            addr,
            reply: Some(tx),
        };
        if !self.handle.schedule(op) {
            return Err(TcpError::NotRunning);
        }
        rx.await.map_err(|_| TcpError::ChannelClosed)?
    }

    /// Queue a keepalive frame for `peer`, connecting if needed.
    pub fn ping(&self, peer: ProcessName) -> TcpResult<()> {
        if self.handle.schedule(ReactorOp::Ping { peer }) {
            Ok(())
        } else {
            Err(TcpError::NotRunning)
        }
    }

    /// Forget a peer: drop its connection and addresses. Messages queued for it
    /// fail as unreachable. Returns whether the peer was known.
    pub async fn forget_peer(&self, name: &ProcessName) -> TcpResult<bool> {
        let (tx, rx) = oneshot::channel();
        let op = ReactorOp::Forget {
            name: name.clone(),
            reply: tx,
        };
        if !self.handle.schedule(op) {
            return Err(TcpError::NotRunning);
        }
        let known = rx.await.map_err(|_| TcpError::ChannelClosed)?;
        self.reachability.clear(name, self.config.transport_index);
        Ok(known)
    }

    /// Whether the reactor still accepts work.
    pub fn is_running(&self) -> bool {
        !self.handle.is_closed()
    }

    /// State of every known peer, sorted by name.
    pub async fn peer_snapshots(&self) -> TcpResult<Vec<PeerSnapshot>> {
        let (tx, rx) = oneshot::channel();
        if !self.handle.schedule(ReactorOp::Dump { reply: tx }) {
            return Err(TcpError::NotRunning);
        }
        rx.await.map_err(|_| TcpError::ChannelClosed)
    }

    /// Stop listening, close every connection and stop the reactor.
    ///
    /// Messages still queued complete with a shutdown error.
    pub async fn finalize(mut self) -> TcpResult<()> {
        for task in &self.listener_tasks {
            task.abort();
        }
        let (tx, rx) = oneshot::channel();
        if self.handle.schedule(ReactorOp::Shutdown { done: tx }) {
            let _ = rx.await;
        }
        match self.reactor.take() {
            Some(ReactorTask::Thread(thread)) => {
                let joined = tokio::task::spawn_blocking(move || thread.join())
                    .await
                    .map_err(|e| TcpError::Io(std::io::Error::other(e)))?;
                if joined.is_err() {
                    error!("reactor thread panicked");
                }
            }
            Some(ReactorTask::Task(task)) => {
                if let Err(e) = task.await {
                    error!(error = %e, "reactor task failed");
                }
            }
            None => {}
        }
        if let Some(task) = self.escalation_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "escalation task failed");
            }
        }
        self.metrics.log_summary();
        info!(local = %self.config.local_name, "TCP transport finalized");
        Ok(())
    }
}

impl Drop for TcpComponent {
    fn drop(&mut self) {
        for task in &self.listener_tasks {
            task.abort();
        }
        if self.reactor.is_some() {
            let (done, _) = oneshot::channel();
            self.handle.schedule(ReactorOp::Shutdown { done });
        }
    }
}

async fn accept_loop(listener: TcpListener, handle: ReactorHandle) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "incoming connection");
                match stream.into_std() {
                    Ok(stream) => {
                        let op = ReactorOp::Accept {
                            stream,
                            addr,
                            reply: None,
                        };
                        if !handle.schedule(op) {
                            break;
                        }
                    }
                    Err(e) => warn!(%addr, error = %e, "cannot detach accepted socket"),
                }
            }
            Err(e) => {
                error!(error = %e, "accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    debug!("accept loop stopped");
}

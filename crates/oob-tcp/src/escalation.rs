//! Failure escalation from the reactor to the component

use crate::component::TransportEvent;
use crate::reachable::ReachabilityMap;
use crate::routing::Collaborators;
use oob_core::{OutboundMessage, ProcessName, SendError};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Conditions the reactor hands to the component.
pub enum Escalation {
    /// Handshake completed with `peer`
    PeerReachable {
        /// Peer
        peer: ProcessName,
    },
    /// An established connection to `peer` dropped
    LostConnection {
        /// Peer
        peer: ProcessName,
    },
    /// Every address of `peer` failed and the retry budget is spent
    FailedToConnect {
        /// Peer
        peer: ProcessName,
        /// Messages that were queued for it
        undeliverable: Vec<OutboundMessage>,
    },
    /// Topology has no next hop for the message
    NoRoute {
        /// The message
        msg: OutboundMessage,
    },
    /// Next hop is not a peer of this transport
    HopUnknown {
        /// Hop chosen by the topology
        hop: ProcessName,
        /// The message
        msg: OutboundMessage,
    },
}

impl fmt::Debug for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Escalation::PeerReachable { peer } => write!(f, "PeerReachable({})", peer),
            Escalation::LostConnection { peer } => write!(f, "LostConnection({})", peer),
            Escalation::FailedToConnect {
                peer,
                undeliverable,
            } => write!(f, "FailedToConnect({}, {} msgs)", peer, undeliverable.len()),
            Escalation::NoRoute { msg } => write!(f, "NoRoute({})", msg.dst),
            Escalation::HopUnknown { hop, msg } => {
                write!(f, "HopUnknown(hop {}, dst {})", hop, msg.dst)
            }
        }
    }
}

/// Applies escalations: reachability bits, lifeline notification,
/// message completion or resubmission, user-visible events.
#[derive(Clone)]
pub(crate) struct EscalationHandler {
    reachability: ReachabilityMap,
    index: u8,
    collaborators: Collaborators,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl EscalationHandler {
    pub(crate) fn new(
        reachability: ReachabilityMap,
        index: u8,
        collaborators: Collaborators,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            reachability,
            index,
            collaborators,
            events,
        }
    }

    /// Drain escalations until the reactor drops its sender.
    pub(crate) async fn run(self, mut rx: mpsc::UnboundedReceiver<Escalation>) {
        while let Some(esc) = rx.recv().await {
            self.handle(esc);
        }
        debug!("escalation channel closed");
    }

    pub(crate) fn handle(&self, esc: Escalation) {
        debug!(escalation = ?esc, "handling escalation");
        match esc {
            Escalation::PeerReachable { peer } => {
                self.reachability.set(&peer, self.index);
                self.emit(TransportEvent::PeerConnected(peer));
            }
            Escalation::LostConnection { peer } => {
                self.mark_unreachable(&peer);
                self.emit(TransportEvent::PeerLost(peer));
            }
            Escalation::FailedToConnect {
                peer,
                undeliverable,
            } => {
                self.mark_unreachable(&peer);
                for mut msg in undeliverable {
                    msg.complete(Err(SendError::Unreachable(peer.clone())));
                }
                self.emit(TransportEvent::PeerUnreachable(peer));
            }
            Escalation::NoRoute { msg } => {
                warn!(dst = %msg.dst, "no route, resubmitting");
                self.reachability.clear(&msg.dst, self.index);
                self.collaborators.framework.resubmit_for_routing(msg);
            }
            Escalation::HopUnknown { hop, msg } => {
                warn!(%hop, dst = %msg.dst, "hop unknown to this transport, resubmitting");
                self.reachability.clear(&hop, self.index);
                self.collaborators.framework.resubmit_for_routing(msg);
            }
        }
    }

    fn mark_unreachable(&self, peer: &ProcessName) {
        self.reachability.clear(peer, self.index);
        if self.collaborators.topology.is_lifeline(peer) {
            info!(%peer, "lifeline lost");
            if let Err(e) = self.collaborators.topology.route_lost(peer) {
                warn!(%peer, error = %e, "route_lost failed");
            }
        }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

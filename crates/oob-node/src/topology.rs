//! Routing collaborators used by the standalone node

use oob_core::{OutboundMessage, ProcessName, SendError};
use oob_tcp::{Framework, Topology};
use tracing::warn;

/// Every peer is reached directly; one optional peer is the lifeline.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    lifeline: Option<ProcessName>,
}

impl StaticTopology {
    pub fn new(lifeline: Option<ProcessName>) -> Self {
        Self { lifeline }
    }
}

impl Topology for StaticTopology {
    fn next_hop(&self, dst: &ProcessName) -> Option<ProcessName> {
        Some(dst.clone())
    }

    fn is_lifeline(&self, peer: &ProcessName) -> bool {
        self.lifeline.as_ref() == Some(peer)
    }

    fn route_lost(&self, peer: &ProcessName) -> Result<(), String> {
        warn!(%peer, "lifeline lost");
        Err(format!("lifeline {} lost", peer))
    }
}

/// There is no other transport; resubmitted messages fail as unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFramework;

impl Framework for LoggingFramework {
    fn resubmit_for_routing(&self, mut msg: OutboundMessage) {
        warn!(dst = %msg.dst, tag = msg.tag, "no alternative transport, dropping message");
        let dst = msg.dst.clone();
        msg.complete(Err(SendError::Unreachable(dst)));
    }
}

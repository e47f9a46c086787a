//! Collaborator interfaces consumed by the transport

use crate::handshake::{Authenticator, NullAuthenticator};
use oob_core::{OutboundMessage, ProcessName};
use std::sync::Arc;

/// Routing-table view of the job.
pub trait Topology: Send + Sync {
    /// Next hop towards `dst`, or `None` if there is no route.
    fn next_hop(&self, dst: &ProcessName) -> Option<ProcessName>;

    /// Whether losing `peer` must be reported through [`Topology::route_lost`].
    fn is_lifeline(&self, _peer: &ProcessName) -> bool {
        false
    }

    /// A lifeline became unreachable; recompute routes.
    fn route_lost(&self, _peer: &ProcessName) -> Result<(), String> {
        Ok(())
    }
}

/// Every destination is its own next hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectTopology;

impl Topology for DirectTopology {
    fn next_hop(&self, dst: &ProcessName) -> Option<ProcessName> {
        Some(dst.clone())
    }
}

/// Higher layer that can try another transport for a message.
pub trait Framework: Send + Sync {
    /// Take back a message this transport could not route.
    fn resubmit_for_routing(&self, msg: OutboundMessage);
}

/// External collaborators handed to the component at init.
#[derive(Clone)]
pub struct Collaborators {
    /// Routing decisions
    pub topology: Arc<dyn Topology>,
    /// Fallback for unroutable messages
    pub framework: Arc<dyn Framework>,
    /// Credential exchange
    pub authenticator: Arc<dyn Authenticator>,
}

impl Collaborators {
    /// Collaborators with the null authenticator.
    pub fn new(topology: Arc<dyn Topology>, framework: Arc<dyn Framework>) -> Self {
        Self {
            topology,
            framework,
            authenticator: Arc::new(NullAuthenticator),
        }
    }

    /// Replace the authenticator.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink;

    impl Framework for Sink {
        fn resubmit_for_routing(&self, _msg: OutboundMessage) {}
    }

    #[test]
    fn test_direct_topology() {
        let dst = ProcessName::new("job", 4).unwrap();
        let topo = DirectTopology;
        assert_eq!(topo.next_hop(&dst), Some(dst.clone()));
        assert!(!topo.is_lifeline(&dst));
        assert!(topo.route_lost(&dst).is_ok());
    }

    #[test]
    fn test_collaborators_default_auth() {
        let collab = Collaborators::new(Arc::new(DirectTopology), Arc::new(Sink));
        assert_eq!(collab.authenticator.credential().method, "none");
        assert!(collab.authenticator.credential().bytes.is_empty());
    }
}

//! Per-peer transport reachability bits

use oob_core::ProcessName;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Which transports can currently reach each peer, one bit per transport.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityMap {
    inner: Arc<RwLock<HashMap<ProcessName, u64>>>,
}

impl ReachabilityMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `peer` reachable via transport `index`.
    pub fn set(&self, peer: &ProcessName, index: u8) {
        *self.inner.write().entry(peer.clone()).or_insert(0) |= 1u64 << index;
    }

    /// Mark `peer` unreachable via transport `index`.
    pub fn clear(&self, peer: &ProcessName, index: u8) {
        let mut inner = self.inner.write();
        if let Some(bits) = inner.get_mut(peer) {
            *bits &= !(1u64 << index);
            if *bits == 0 {
                inner.remove(peer);
            }
        }
    }

    /// Bitmask of transports reaching `peer`.
    pub fn transports(&self, peer: &ProcessName) -> u64 {
        self.inner.read().get(peer).copied().unwrap_or(0)
    }

    /// True if transport `index` reaches `peer`.
    pub fn is_reachable_via(&self, peer: &ProcessName, index: u8) -> bool {
        self.transports(peer) & (1u64 << index) != 0
    }

    /// True if any transport reaches `peer`.
    pub fn is_reachable(&self, peer: &ProcessName) -> bool {
        self.transports(peer) != 0
    }

    /// Peers with at least one transport.
    pub fn peers(&self) -> Vec<ProcessName> {
        let mut peers: Vec<_> = self.inner.read().keys().cloned().collect();
        peers.sort();
        peers
    }
}

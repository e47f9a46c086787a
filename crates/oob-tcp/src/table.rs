//! Peer table keyed by the 64-bit identity collapse

use crate::peer::PeerRecord;
use oob_core::ProcessName;
use std::collections::HashMap;
use tracing::warn;

/// Identity to [`PeerRecord`] index.
///
/// A stored record whose name differs from the one looked up (a key
/// collision) is reported as absent.
#[derive(Default)]
pub(crate) struct PeerTable {
    peers: HashMap<u64, PeerRecord>,
}

impl PeerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, name: &ProcessName) -> Option<&PeerRecord> {
        let rec = self.peers.get(&name.key())?;
        if &rec.name != name {
            warn!(wanted = %name, stored = %rec.name, "peer key collision");
            return None;
        }
        Some(rec)
    }

    pub(crate) fn lookup_mut(&mut self, name: &ProcessName) -> Option<&mut PeerRecord> {
        let rec = self.peers.get_mut(&name.key())?;
        if &rec.name != name {
            warn!(wanted = %name, stored = %rec.name, "peer key collision");
            return None;
        }
        Some(rec)
    }

    pub(crate) fn get_by_key(&self, key: u64) -> Option<&PeerRecord> {
        self.peers.get(&key)
    }

    pub(crate) fn get_by_key_mut(&mut self, key: u64) -> Option<&mut PeerRecord> {
        self.peers.get_mut(&key)
    }

    /// Insert a record. Refuses to replace a different peer sharing the key.
    pub(crate) fn insert(&mut self, record: PeerRecord) -> bool {
        let key = record.key();
        if let Some(existing) = self.peers.get(&key) {
            if existing.name != record.name {
                warn!(new = %record.name, stored = %existing.name, "peer key collision, not inserting");
                return false;
            }
        }
        self.peers.insert(key, record);
        true
    }

    /// Get the record for `name`, creating an empty one if needed.
    pub(crate) fn get_or_create(&mut self, name: &ProcessName) -> Option<&mut PeerRecord> {
        if !self.peers.contains_key(&name.key()) {
            self.insert(PeerRecord::new(name.clone()));
        }
        self.lookup_mut(name)
    }

    pub(crate) fn remove(&mut self, name: &ProcessName) -> Option<PeerRecord> {
        self.lookup(name)?;
        self.peers.remove(&name.key())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = PeerRecord> + '_ {
        self.peers.drain().map(|(_, rec)| rec)
    }
}

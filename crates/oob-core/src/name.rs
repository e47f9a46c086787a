//! Process identity

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum namespace length in bytes. The wire field holds one more byte for the NUL.
pub const MAX_NSPACE_LEN: usize = 255;

/// Rank used by [`ProcessName::unknown`].
const UNKNOWN_RANK: u32 = u32::MAX;

/// Identity of a process in the job: namespace plus rank.
///
/// Ordering is namespace first, then rank. The race resolution in the
/// connection handshake relies on this being a total order.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProcessName {
    nspace: String,
    rank: u32,
}

impl ProcessName {
    /// Create a name, validating the namespace.
    pub fn new(nspace: impl Into<String>, rank: u32) -> CoreResult<Self> {
        let nspace = nspace.into();
        if nspace.is_empty() {
            return Err(CoreError::InvalidName("empty namespace".into()));
        }
        Self::from_parts(nspace, rank)
    }

    /// Placeholder identity used when the remote side is not known yet (probes).
    pub fn unknown() -> Self {
        Self {
            nspace: String::new(),
            rank: UNKNOWN_RANK,
        }
    }

    /// Build from wire parts. Unlike [`ProcessName::new`] an empty namespace is allowed.
    pub(crate) fn from_parts(nspace: String, rank: u32) -> CoreResult<Self> {
        if nspace.len() > MAX_NSPACE_LEN {
            return Err(CoreError::NamespaceTooLong(nspace.len()));
        }
        if nspace.contains('\0') {
            return Err(CoreError::InvalidName("namespace contains NUL".into()));
        }
        Ok(Self { nspace, rank })
    }

    /// Namespace (job) part.
    pub fn nspace(&self) -> &str {
        &self.nspace
    }

    /// Rank within the namespace.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Returns true for the [`ProcessName::unknown`] placeholder.
    pub fn is_unknown(&self) -> bool {
        self.nspace.is_empty() && self.rank == UNKNOWN_RANK
    }

    /// Collapse the identity into a 64-bit table key.
    ///
    /// High half is FNV-1a of the namespace, low half is the rank.
    pub fn key(&self) -> u64 {
        (u64::from(fnv1a32(self.nspace.as_bytes())) << 32) | u64::from(self.rank)
    }
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return write!(f, "<unknown>");
        }
        write!(f, "{}:{}", self.nspace, self.rank)
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessName({})", self)
    }
}

impl FromStr for ProcessName {
    type Err = CoreError;

    /// Parses `nspace:rank`. The namespace itself may contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (nspace, rank) = s
            .rsplit_once(':')
            .ok_or_else(|| CoreError::InvalidName(format!("missing rank in {:?}", s)))?;
        let rank = rank
            .parse::<u32>()
            .map_err(|e| CoreError::InvalidName(format!("bad rank in {:?}: {}", s, e)))?;
        Self::new(nspace, rank)
    }
}

impl TryFrom<String> for ProcessName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProcessName> for String {
    fn from(name: ProcessName) -> Self {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_name_new() {
        let name = ProcessName::new("x", 0).unwrap();
        assert_eq!(name.nspace(), "x");
        assert_eq!(name.rank(), 0);
        assert!(!name.is_unknown());
    }

    #[test]
    fn test_name_rejects_empty_and_long() {
        assert!(ProcessName::new("", 1).is_err());
        let long = "a".repeat(MAX_NSPACE_LEN + 1);
        assert_eq!(
            ProcessName::new(long, 1),
            Err(CoreError::NamespaceTooLong(MAX_NSPACE_LEN + 1))
        );
        assert!(ProcessName::new("a".repeat(MAX_NSPACE_LEN), 1).is_ok());
    }

    #[test]
    fn test_name_rejects_nul() {
        assert!(ProcessName::new("bad\0ns", 0).is_err());
    }

    #[test]
    fn test_name_ordering() {
        let a0 = ProcessName::new("a", 0).unwrap();
        let a5 = ProcessName::new("a", 5).unwrap();
        let b0 = ProcessName::new("b", 0).unwrap();
        assert!(a0 < a5);
        assert!(a5 < b0);
        assert!(b0 > a0);
    }

    #[test]
    fn test_name_key_low_half_is_rank() {
        let name = ProcessName::new("job-1", 42).unwrap();
        assert_eq!(name.key() & 0xffff_ffff, 42);
        let other = ProcessName::new("job-1", 43).unwrap();
        assert_eq!(name.key() >> 32, other.key() >> 32);
        assert_ne!(name.key(), other.key());
    }

    #[test]
    fn test_name_key_distinguishes_namespaces() {
        let keys: HashSet<u64> = ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|ns| ProcessName::new(*ns, 0).unwrap().key())
            .collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_name_parse_display() {
        let name: ProcessName = "prterun-host-1234@1:7".parse().unwrap();
        assert_eq!(name.nspace(), "prterun-host-1234@1");
        assert_eq!(name.rank(), 7);
        assert_eq!(name.to_string(), "prterun-host-1234@1:7");

        let with_colon: ProcessName = "ns:with:colons:3".parse().unwrap();
        assert_eq!(with_colon.nspace(), "ns:with:colons");
        assert_eq!(with_colon.rank(), 3);
    }

    #[test]
    fn test_name_parse_errors() {
        assert!("norank".parse::<ProcessName>().is_err());
        assert!("job:abc".parse::<ProcessName>().is_err());
        assert!(":3".parse::<ProcessName>().is_err());
    }

    #[test]
    fn test_unknown_display() {
        let unknown = ProcessName::unknown();
        assert!(unknown.is_unknown());
        assert_eq!(unknown.to_string(), "<unknown>");
    }

    #[test]
    fn test_name_serde() {
        let name = ProcessName::new("x", 9).unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"x:9\"");
        let back: ProcessName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
        assert!(serde_json::from_str::<ProcessName>("\"x\"").is_err());
    }
}

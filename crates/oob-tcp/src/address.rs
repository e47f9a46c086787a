//! Candidate endpoints of a peer

use crate::config::AddressFamily;
use crate::error::{TcpError, TcpResult};
use crate::state::ConnState;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};

/// One socket address a peer may be reached at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    /// Endpoint
    pub addr: SocketAddr,
    /// Connect attempts aborted on this address since the last success
    pub retries: u32,
    /// Last known state of this address
    pub state: ConnState,
}

impl PeerAddress {
    /// Fresh address record.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            retries: 0,
            state: ConnState::Unconnected,
        }
    }

    /// Worth dialing under the given per-address retry cap.
    pub fn is_viable(&self, max_retries: u32) -> bool {
        self.state != ConnState::Failed && self.retries <= max_retries
    }

    /// Forget failures so the address is tried again.
    pub fn reset(&mut self) {
        self.retries = 0;
        self.state = ConnState::Unconnected;
    }

    /// Diagnostic view.
    pub fn snapshot(&self) -> AddressSnapshot {
        AddressSnapshot {
            addr: self.addr,
            state: self.state,
            retries: self.retries,
        }
    }
}

/// Serializable view of a [`PeerAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressSnapshot {
    /// Endpoint
    pub addr: SocketAddr,
    /// State
    pub state: ConnState,
    /// Retry count
    pub retries: u32,
}

/// Parse a comma separated port list such as `"5000, 5001"`.
pub fn parse_ports(ports: &str) -> TcpResult<Vec<u16>> {
    let parsed = ports
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u16>()
                .map_err(|e| TcpError::InvalidAddress(format!("bad port {:?}: {}", p, e)))
        })
        .collect::<TcpResult<Vec<u16>>>()?;
    if parsed.is_empty() {
        return Err(TcpError::InvalidAddress(format!("no ports in {:?}", ports)));
    }
    Ok(parsed)
}

/// Resolve `host` and pair every address of `family` with every port.
///
/// Literal IPs skip name resolution. Brackets around IPv6 literals are accepted.
pub async fn resolve_candidates(
    family: AddressFamily,
    host: &str,
    ports: &[u16],
) -> TcpResult<Vec<SocketAddr>> {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    let ips: Vec<IpAddr> = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| TcpError::InvalidAddress(format!("cannot resolve {}: {}", host, e)))?
            .map(|sa| sa.ip())
            .collect(),
    };

    let mut out = Vec::new();
    for ip in ips {
        let addr_family = match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        };
        if addr_family != family {
            continue;
        }
        for port in ports {
            let sa = SocketAddr::new(ip, *port);
            if !out.contains(&sa) {
                out.push(sa);
            }
        }
    }
    Ok(out)
}

//! Listening sockets, one per enabled address family

use crate::config::{AddressFamily, TcpConfig};
use crate::error::{TcpError, TcpResult};
use socket2::SockRef;
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info, warn};

/// Bound listeners of this process.
pub struct ListenerSet {
    listeners: Vec<(AddressFamily, TcpListener)>,
}

impl ListenerSet {
    /// Bind a listener for each enabled family.
    ///
    /// Static ports are tried in order, then the dynamic range, then an
    /// ephemeral port. Failing in one family is tolerated if another bound.
    pub async fn bind(config: &TcpConfig) -> TcpResult<Self> {
        let mut listeners = Vec::new();
        let mut last_err = None;

        for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            if !config.family_enabled(family) {
                continue;
            }
            match bind_family(config, family) {
                Ok(listener) => {
                    info!(family = family.scheme(), addr = %listener.local_addr()?, "listening");
                    listeners.push((family, listener));
                }
                Err(e) => {
                    warn!(family = family.scheme(), error = %e, "no listener for family");
                    last_err = Some(e);
                }
            }
        }

        if listeners.is_empty() {
            return Err(last_err
                .unwrap_or_else(|| TcpError::Config("no address family enabled".into())));
        }
        Ok(Self { listeners })
    }

    /// Local addresses other processes can dial.
    pub fn contact_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|(_, l)| l.local_addr().ok())
            .collect()
    }

    /// Contact string, e.g. `tcp://10.0.0.1:5000,tcp6://[::1]:5001`.
    pub fn uri(&self) -> String {
        self.listeners
            .iter()
            .filter_map(|(family, l)| {
                l.local_addr()
                    .ok()
                    .map(|addr| format!("{}://{}", family.scheme(), addr))
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn into_listeners(self) -> Vec<TcpListener> {
        self.listeners.into_iter().map(|(_, l)| l).collect()
    }
}

fn bind_family(config: &TcpConfig, family: AddressFamily) -> TcpResult<TcpListener> {
    let (ip, static_ports, dynamic) = match family {
        AddressFamily::Ipv4 => (
            IpAddr::V4(config.listen_ipv4),
            &config.static_ipv4_ports,
            config.dynamic_ipv4_ports,
        ),
        AddressFamily::Ipv6 => (
            IpAddr::V6(config.listen_ipv6),
            &config.static_ipv6_ports,
            config.dynamic_ipv6_ports,
        ),
    };

    let candidates: Vec<u16> = if !static_ports.is_empty() {
        static_ports.clone()
    } else if let Some(range) = dynamic {
        range.ports().collect()
    } else {
        vec![0]
    };

    let mut last_err = None;
    for port in candidates {
        let addr = SocketAddr::new(ip, port);
        match bind_one(addr, config.backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(%addr, error = %e, "bind failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .map(TcpError::from)
        .unwrap_or_else(|| TcpError::Config("empty port list".into())))
}

fn bind_one(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => {
            let socket = TcpSocket::new_v6()?;
            SockRef::from(&socket).set_only_v6(true)?;
            socket
        }
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

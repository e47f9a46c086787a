//! CLI argument parsing for oob-node

use clap::Parser;
use oob_core::ProcessName;
use oob_tcp::AddressFamily;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// A remote process and where it listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    /// Identity of the remote process
    pub name: ProcessName,
    /// Address family of `host`
    pub family: AddressFamily,
    /// Host name or IP literal
    pub host: String,
    /// Comma-separated ports
    pub ports: String,
}

/// Parse `nspace:rank@host:ports`, e.g. `job:1@10.0.0.2:5000,5001` or `job:1@[::1]:5000`.
pub fn parse_peer(s: &str) -> Result<PeerSpec, String> {
    let (name, endpoint) = s
        .split_once('@')
        .ok_or_else(|| format!("expected nspace:rank@host:ports, got {:?}", s))?;
    let name: ProcessName = name.parse().map_err(|e| format!("{}", e))?;
    let (host, ports) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| format!("missing ports in {:?}", endpoint))?;
    if host.is_empty() || ports.is_empty() {
        return Err(format!("bad endpoint {:?}", endpoint));
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let family = match bare.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => AddressFamily::Ipv6,
        _ => AddressFamily::Ipv4,
    };
    Ok(PeerSpec {
        name,
        family,
        host: bare.to_string(),
        ports: ports.to_string(),
    })
}

/// Out-of-band TCP messaging process
#[derive(Parser, Debug, Clone)]
#[command(name = "oob-node")]
#[command(about = "Out-of-band TCP messaging process")]
#[command(version)]
pub struct Cli {
    /// JSON transport configuration file (optional, defaults apply otherwise)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Job namespace of this process
    #[arg(long, default_value = "job")]
    pub nspace: String,

    /// Rank of this process within the namespace
    #[arg(long, default_value = "0")]
    pub rank: u32,

    /// Version string exchanged in the handshake (overrides the config file)
    #[arg(long)]
    pub version_string: Option<String>,

    /// IPv4 listen address (overrides the config file)
    #[arg(long)]
    pub listen: Option<Ipv4Addr>,

    /// Static IPv4 listen ports (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub ports: Vec<u16>,

    /// Also listen on and dial IPv6 addresses
    #[arg(long)]
    pub ipv6: bool,

    /// Known peer as nspace:rank@host:ports (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<PeerSpec>,

    /// Peer whose loss must be reported to the routing layer
    #[arg(long)]
    pub lifeline: Option<ProcessName>,

    /// Send a greeting to every peer on startup
    #[arg(long)]
    pub send_hello: bool,

    /// Seconds between keepalive pings to every peer (0 disables)
    #[arg(long, default_value = "0")]
    pub ping_interval: u64,

    /// Shared secret (hex) presented and required during the handshake
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

//! Transport configuration

use crate::error::{TcpError, TcpResult};
use oob_core::ProcessName;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// Address family of a candidate endpoint or listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl AddressFamily {
    /// Family of a socket address.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// URI scheme used in contact strings.
    pub fn scheme(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "tcp",
            AddressFamily::Ipv6 => "tcp6",
        }
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port
    pub start: u16,
    /// Last port
    pub end: u16,
}

impl PortRange {
    /// Create a range.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Iterate the ports in the range.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// TCP keepalive settings applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Enable keepalive probing
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Idle time before the first probe
    #[serde(default = "default_keepalive_time", with = "duration_ms")]
    pub time: Duration,
    /// Interval between probes
    #[serde(default = "default_keepalive_interval", with = "duration_ms")]
    pub interval: Duration,
    /// Unanswered probes before the connection is dropped
    #[serde(default = "default_keepalive_probes")]
    pub probes: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time: default_keepalive_time(),
            interval: default_keepalive_interval(),
            probes: default_keepalive_probes(),
        }
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Identity of this process
    #[serde(default = "ProcessName::unknown")]
    pub local_name: ProcessName,
    /// Version string exchanged in the handshake; must match exactly
    #[serde(default = "default_version")]
    pub version: String,
    /// Connect attempts per address before it is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Socket send buffer size, 0 keeps the OS default
    #[serde(default)]
    pub sndbuf: usize,
    /// Socket receive buffer size, 0 keeps the OS default
    #[serde(default)]
    pub rcvbuf: usize,
    /// Keepalive settings
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// Delay before a new round over all addresses; zero disables the retry cycle
    #[serde(default = "default_retry_delay", with = "duration_ms")]
    pub retry_delay: Duration,
    /// Rounds over all addresses before giving up; `None` retries forever
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: Option<u32>,
    /// Fixed IPv4 listening ports, tried in order
    #[serde(default)]
    pub static_ipv4_ports: Vec<u16>,
    /// IPv4 listening port range
    #[serde(default)]
    pub dynamic_ipv4_ports: Option<PortRange>,
    /// Fixed IPv6 listening ports, tried in order
    #[serde(default)]
    pub static_ipv6_ports: Vec<u16>,
    /// IPv6 listening port range
    #[serde(default)]
    pub dynamic_ipv6_ports: Option<PortRange>,
    /// Do not listen on or connect to IPv4 addresses
    #[serde(default)]
    pub disable_ipv4: bool,
    /// Do not listen on or connect to IPv6 addresses
    #[serde(default = "default_true")]
    pub disable_ipv6: bool,
    /// IPv4 interface to listen on
    #[serde(default = "default_listen_ipv4")]
    pub listen_ipv4: Ipv4Addr,
    /// IPv6 interface to listen on
    #[serde(default = "default_listen_ipv6")]
    pub listen_ipv6: Ipv6Addr,
    /// Bound on the blocking-style handshake exchange
    #[serde(default = "default_handshake_timeout", with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Largest payload accepted from the wire
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: u32,
    /// Bit of this transport in the reachability map
    #[serde(default)]
    pub transport_index: u8,
    /// Run the reactor on its own thread
    #[serde(default = "default_true")]
    pub progress_thread: bool,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_keepalive_time() -> Duration {
    Duration::from_secs(300)
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_keepalive_probes() -> u32 {
    9
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_reconnect_attempts() -> Option<u32> {
    Some(10)
}

fn default_listen_ipv4() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_listen_ipv6() -> Ipv6Addr {
    Ipv6Addr::UNSPECIFIED
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_max_msg_size() -> u32 {
    16 * 1024 * 1024
}

fn default_backlog() -> u32 {
    1024
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            local_name: ProcessName::unknown(),
            version: default_version(),
            max_retries: default_max_retries(),
            sndbuf: 0,
            rcvbuf: 0,
            keepalive: KeepaliveConfig::default(),
            retry_delay: default_retry_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            static_ipv4_ports: Vec::new(),
            dynamic_ipv4_ports: None,
            static_ipv6_ports: Vec::new(),
            dynamic_ipv6_ports: None,
            disable_ipv4: false,
            disable_ipv6: true,
            listen_ipv4: default_listen_ipv4(),
            listen_ipv6: default_listen_ipv6(),
            handshake_timeout: default_handshake_timeout(),
            max_msg_size: default_max_msg_size(),
            transport_index: 0,
            progress_thread: true,
            backlog: default_backlog(),
        }
    }
}

impl TcpConfig {
    /// Default configuration for the given process.
    pub fn new(local_name: ProcessName) -> Self {
        Self {
            local_name,
            ..Default::default()
        }
    }

    /// Set the handshake version string
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set per-address connect retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between address rounds
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the round budget (`None` = unlimited)
    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set socket buffer sizes
    pub fn with_buffers(mut self, sndbuf: usize, rcvbuf: usize) -> Self {
        self.sndbuf = sndbuf;
        self.rcvbuf = rcvbuf;
        self
    }

    /// Set keepalive parameters
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Listen on the given IPv4 interface
    pub fn with_listen_ipv4(mut self, addr: Ipv4Addr) -> Self {
        self.listen_ipv4 = addr;
        self
    }

    /// Set fixed IPv4 listening ports
    pub fn with_static_ipv4_ports(mut self, ports: Vec<u16>) -> Self {
        self.static_ipv4_ports = ports;
        self
    }

    /// Set the IPv4 listening port range
    pub fn with_dynamic_ipv4_ports(mut self, range: PortRange) -> Self {
        self.dynamic_ipv4_ports = Some(range);
        self
    }

    /// Enable or disable IPv6
    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.disable_ipv6 = !enabled;
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the largest accepted payload
    pub fn with_max_msg_size(mut self, size: u32) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Set the reachability bit of this transport
    pub fn with_transport_index(mut self, index: u8) -> Self {
        self.transport_index = index;
        self
    }

    /// Run the reactor on a dedicated thread or on the caller's runtime
    pub fn with_progress_thread(mut self, enabled: bool) -> Self {
        self.progress_thread = enabled;
        self
    }

    /// Returns true if addresses of `family` may be used.
    pub fn family_enabled(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::Ipv4 => !self.disable_ipv4,
            AddressFamily::Ipv6 => !self.disable_ipv6,
        }
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> TcpResult<()> {
        if self.local_name.is_unknown() {
            return Err(TcpError::Config("local_name is not set".into()));
        }
        if self.disable_ipv4 && self.disable_ipv6 {
            return Err(TcpError::Config("both IPv4 and IPv6 are disabled".into()));
        }
        if !self.static_ipv4_ports.is_empty() && self.dynamic_ipv4_ports.is_some() {
            return Err(TcpError::Config(
                "static and dynamic IPv4 ports are mutually exclusive".into(),
            ));
        }
        if !self.static_ipv6_ports.is_empty() && self.dynamic_ipv6_ports.is_some() {
            return Err(TcpError::Config(
                "static and dynamic IPv6 ports are mutually exclusive".into(),
            ));
        }
        for range in [self.dynamic_ipv4_ports, self.dynamic_ipv6_ports].iter().flatten() {
            if range.start > range.end {
                return Err(TcpError::Config(format!(
                    "empty port range {}-{}",
                    range.start, range.end
                )));
            }
        }
        if self.handshake_timeout.is_zero() {
            return Err(TcpError::Config("handshake_timeout must be non-zero".into()));
        }
        if self.transport_index >= 64 {
            return Err(TcpError::Config(format!(
                "transport_index {} does not fit the reachability mask",
                self.transport_index
            )));
        }
        Ok(())
    }

    /// Load from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> TcpResult<Self> {
        serde_json::from_str(json).map_err(|e| TcpError::Config(e.to_string()))
    }
}

/// Serde helper storing durations as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ProcessName {
        ProcessName::new("job", 0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = TcpConfig::new(local());
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay, Duration::from_millis(200));
        assert_eq!(config.max_reconnect_attempts, Some(10));
        assert_eq!(config.keepalive.time, Duration::from_secs(300));
        assert_eq!(config.keepalive.interval, Duration::from_secs(20));
        assert_eq!(config.keepalive.probes, 9);
        assert_eq!(config.max_msg_size, 16 * 1024 * 1024);
        assert!(config.progress_thread);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_name() {
        assert!(matches!(
            TcpConfig::default().validate(),
            Err(TcpError::Config(_))
        ));
    }

    #[test]
    fn test_validate_families() {
        let mut config = TcpConfig::new(local());
        config.disable_ipv4 = true;
        config.disable_ipv6 = true;
        assert!(config.validate().is_err());
        config.disable_ipv6 = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_static_dynamic_exclusive() {
        let config = TcpConfig::new(local())
            .with_static_ipv4_ports(vec![7000])
            .with_dynamic_ipv4_ports(PortRange::new(8000, 8010));
        let err = config.validate().unwrap_err();
        assert!(format!("{}", err).contains("mutually exclusive"));
    }

    #[test]
    fn test_validate_range_order() {
        let config = TcpConfig::new(local()).with_dynamic_ipv4_ports(PortRange::new(9, 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_family_enabled() {
        let config = TcpConfig::new(local());
        assert!(config.family_enabled(AddressFamily::Ipv4));
        assert!(!config.family_enabled(AddressFamily::Ipv6));
        let config = config.with_ipv6(true);
        assert!(config.family_enabled(AddressFamily::Ipv6));
    }

    #[test]
    fn test_from_json_partial() {
        let config = TcpConfig::from_json(
            r#"{
                "local_name": "job:3",
                "version": "1.0",
                "retry_delay": 0,
                "max_reconnect_attempts": null,
                "keepalive": { "enabled": false },
                "dynamic_ipv4_ports": { "start": 9000, "end": 9005 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.local_name.rank(), 3);
        assert_eq!(config.version, "1.0");
        assert!(config.retry_delay.is_zero());
        assert_eq!(config.max_reconnect_attempts, None);
        assert!(!config.keepalive.enabled);
        assert_eq!(config.keepalive.probes, 9);
        assert_eq!(config.dynamic_ipv4_ports.unwrap().ports().count(), 6);
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(TcpConfig::from_json("{ \"max_retries\": \"many\" }").is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = TcpConfig::new(local()).with_retry_delay(Duration::from_millis(50));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"retry_delay\":50"));
        let back = TcpConfig::from_json(&json).unwrap();
        assert_eq!(back.retry_delay, Duration::from_millis(50));
        assert_eq!(back.local_name, config.local_name);
    }

    #[test]
    fn test_family_scheme() {
        let v4: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let v6: SocketAddr = "[::1]:1".parse().unwrap();
        assert_eq!(AddressFamily::of(&v4).scheme(), "tcp");
        assert_eq!(AddressFamily::of(&v6).scheme(), "tcp6");
    }
}

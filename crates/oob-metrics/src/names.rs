//! Metric names recorded by the TCP transport

/// Messages fully written to a socket
pub const MSGS_SENT: &str = "oob.msgs_sent";
/// Payload bytes fully written
pub const BYTES_SENT: &str = "oob.bytes_sent";
/// Messages fully read from a socket
pub const MSGS_RECEIVED: &str = "oob.msgs_received";
/// Payload bytes fully read
pub const BYTES_RECEIVED: &str = "oob.bytes_received";
/// Received messages forwarded to another hop
pub const MSGS_RELAYED: &str = "oob.msgs_relayed";
/// Connections that completed the handshake
pub const CONNECTS: &str = "oob.connects";
/// Connect attempts that failed on an address
pub const CONNECT_FAILURES: &str = "oob.connect_failures";
/// Handshakes rejected (version, credential, identity)
pub const HANDSHAKE_REJECTIONS: &str = "oob.handshake_rejections";
/// Established connections that were lost
pub const LOST_CONNECTIONS: &str = "oob.lost_connections";
/// Peers currently connected
pub const PEERS_CONNECTED: &str = "oob.peers_connected";
/// Time spent in the blocking-style handshake exchange
pub const HANDSHAKE_US: &str = "oob.handshake_us";

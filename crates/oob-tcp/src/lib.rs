//! # oob-tcp
//!
//! TCP out-of-band transport between the processes of a job.
//!
//! This crate provides:
//! - Peer connection management with per-address retry and reconnect rounds
//! - Identification handshake with version check and pluggable credentials
//! - Resumable, non-blocking send and receive pumps with FIFO per-peer queues
//! - Relaying of messages for other destinations through the routing topology
//! - Deterministic resolution of simultaneous connections
//! - Escalation of failures to the routing layer
//!
//! ## Architecture
//!
//! ```text
//! +----------------------+
//! |    TcpComponent      |  <- send / set_peer_address / accept_connection
//! +----------------------+
//!      |  ReactorOp (channel)        ^ Escalation (channel)
//!      v                             |
//! +----------------------+    +-------------------+
//! |   TransportModule    |--->| EscalationHandler |  <- reachability, framework
//! |  (reactor task)      |    +-------------------+
//! +----------------------+
//!      |
//! +-----------+----------+
//! | PeerTable | Listener |  <- one PeerRecord per remote process
//! +-----------+----------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use oob_tcp::{Collaborators, DirectTopology, TcpComponent, TcpConfig, TransportEvent};
//!
//! let config = TcpConfig::new(ProcessName::new("job", 0)?);
//! let mut tcp = TcpComponent::init(config, Collaborators::new(Arc::new(DirectTopology), framework)).await?;
//! let mut events = tcp.take_events().unwrap();
//!
//! tcp.set_peer_address(peer.clone(), AddressFamily::Ipv4, "10.0.0.2", "5000,5001").await?;
//! tcp.send(OutboundMessage::new(tcp.local_name().clone(), peer, 7, payload))?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         TransportEvent::Message(msg) => { /* ... */ }
//!         TransportEvent::PeerUnreachable(peer) => { /* ... */ }
//!         _ => {}
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod address;
mod component;
mod config;
mod connection;
mod error;
mod escalation;
mod handshake;
mod listener;
mod module;
mod peer;
mod pending;
mod probe;
mod reachable;
mod reactor;
mod routing;
mod socket;
mod state;
mod table;

pub use address::{parse_ports, resolve_candidates, AddressSnapshot, PeerAddress};
pub use component::{TcpComponent, TransportEvent};
pub use config::{AddressFamily, KeepaliveConfig, PortRange, TcpConfig};
pub use connection::AcceptOutcome;
pub use error::{HandshakeRejection, TcpError, TcpResult};
pub use handshake::{Authenticator, Credential, NullAuthenticator, TokenAuthenticator};
pub use listener::ListenerSet;
pub use peer::PeerSnapshot;
pub use probe::probe;
pub use reachable::ReachabilityMap;
pub use routing::{Collaborators, DirectTopology, Framework, Topology};
pub use state::{resolve_race, ConnEvent, ConnState, InvalidTransition, RaceOutcome};

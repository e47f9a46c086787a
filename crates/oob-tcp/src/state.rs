//! Connection state machine

use oob_core::ProcessName;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// State of a peer, or of one of its addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ConnState {
    /// No connection and none in progress
    #[default]
    Unconnected,
    /// Picking the next address to dial
    Resolve,
    /// Non-blocking connect in progress
    Connecting,
    /// Our identification is sent, waiting for the remote one
    ConnectAck,
    /// Handshake complete, traffic flows
    Connected,
    /// Gave up on this peer or address
    Failed,
    /// An established connection was lost
    Closed,
    /// Inbound connection being identified
    Accepting,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::Unconnected => "UNCONNECTED",
            ConnState::Resolve => "RESOLVE",
            ConnState::Connecting => "CONNECTING",
            ConnState::ConnectAck => "ACK",
            ConnState::Connected => "CONNECTED",
            ConnState::Failed => "FAILED",
            ConnState::Closed => "CLOSED",
            ConnState::Accepting => "ACCEPTING",
        };
        f.write_str(s)
    }
}

/// Inputs that move a peer between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// A send needs a connection
    ConnectRequested,
    /// A socket was created and connect() issued
    ConnectStarted,
    /// connect() completed and our ident was written
    ConnectEstablished,
    /// Remote ident validated
    HandshakeComplete,
    /// Inbound connection from this peer
    Accepted,
    /// Waiting for a retry timer
    RetryScheduled,
    /// No address and no retry budget left
    Exhausted,
    /// Handshake refused
    Rejected,
    /// Established connection dropped
    Lost,
    /// New addresses arrived for a failed or closed peer
    Reset,
    /// Our own attempt dropped in favor of the remote one
    Abandoned,
}

/// A `(state, event)` pair with no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in state {state}")]
pub struct InvalidTransition {
    /// State at the time
    pub state: ConnState,
    /// Offending event
    pub event: ConnEvent,
}

impl ConnState {
    /// Apply an event and return the next state.
    pub fn on(self, event: ConnEvent) -> Result<ConnState, InvalidTransition> {
        use ConnEvent::*;
        use ConnState::*;

        let next = match (self, event) {
            (Unconnected | Closed, ConnectRequested) => Resolve,
            (Resolve | Connecting, ConnectStarted) => Connecting,
            (Connecting, ConnectEstablished) => ConnectAck,
            (ConnectAck | Accepting, HandshakeComplete) => Connected,
            (Unconnected | Closed | Failed | Resolve, Accepted) => Accepting,
            (Resolve | Connecting | ConnectAck, RetryScheduled) => Unconnected,
            (Resolve | Connecting | ConnectAck, Exhausted) => Failed,
            (Unconnected | Closed | Connecting | ConnectAck | Accepting, Rejected) => Failed,
            (Connected | Accepting, Lost) => Closed,
            (Failed | Closed, Reset) => Unconnected,
            (Connecting | ConnectAck | Connected, Abandoned) => Unconnected,
            (state, event) => return Err(InvalidTransition { state, event }),
        };
        Ok(next)
    }

    /// States in which an inbound connection from the same peer collides.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnState::Connecting | ConnState::ConnectAck | ConnState::Connected
        )
    }
}

/// Outcome of an inbound connection meeting our own state for that peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    /// No competing connection
    NoConflict,
    /// Drop ours and take the inbound one
    AbandonOwn,
    /// Keep ours and close the inbound one
    RejectIncoming,
}

/// Pick the surviving connection when both sides dialed each other.
///
/// The greater identity's connection wins, so both ends reach the same answer.
pub fn resolve_race(state: ConnState, local: &ProcessName, remote: &ProcessName) -> RaceOutcome {
    if !state.is_active() {
        return RaceOutcome::NoConflict;
    }
    if remote > local {
        RaceOutcome::AbandonOwn
    } else {
        RaceOutcome::RejectIncoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ConnState; 8] = [
        ConnState::Unconnected,
        ConnState::Resolve,
        ConnState::Connecting,
        ConnState::ConnectAck,
        ConnState::Connected,
        ConnState::Failed,
        ConnState::Closed,
        ConnState::Accepting,
    ];

    #[test]
    fn test_connect_path() {
        let s = ConnState::Unconnected;
        let s = s.on(ConnEvent::ConnectRequested).unwrap();
        assert_eq!(s, ConnState::Resolve);
        let s = s.on(ConnEvent::ConnectStarted).unwrap();
        assert_eq!(s, ConnState::Connecting);
        let s = s.on(ConnEvent::ConnectEstablished).unwrap();
        assert_eq!(s, ConnState::ConnectAck);
        let s = s.on(ConnEvent::HandshakeComplete).unwrap();
        assert_eq!(s, ConnState::Connected);
        let s = s.on(ConnEvent::Lost).unwrap();
        assert_eq!(s, ConnState::Closed);
        assert_eq!(s.on(ConnEvent::ConnectRequested).unwrap(), ConnState::Resolve);
    }

    #[test]
    fn test_accept_path() {
        let s = ConnState::Unconnected.on(ConnEvent::Accepted).unwrap();
        assert_eq!(s, ConnState::Accepting);
        assert_eq!(s.on(ConnEvent::HandshakeComplete).unwrap(), ConnState::Connected);
        assert_eq!(s.on(ConnEvent::Rejected).unwrap(), ConnState::Failed);
    }

    #[test]
    fn test_rejection_from_idle_states() {
        for state in [ConnState::Unconnected, ConnState::Closed] {
            assert_eq!(state.on(ConnEvent::Rejected).unwrap(), ConnState::Failed);
        }
        assert!(ConnState::Connected.on(ConnEvent::Rejected).is_err());
        assert!(ConnState::Failed.on(ConnEvent::Rejected).is_err());
    }

    #[test]
    fn test_failure_and_reset() {
        let s = ConnState::Connecting.on(ConnEvent::Exhausted).unwrap();
        assert_eq!(s, ConnState::Failed);
        assert_eq!(s.on(ConnEvent::Reset).unwrap(), ConnState::Unconnected);
        assert!(s.on(ConnEvent::ConnectRequested).is_err());
    }

    #[test]
    fn test_invalid_transitions() {
        let err = ConnState::Connected.on(ConnEvent::ConnectStarted).unwrap_err();
        assert_eq!(err.state, ConnState::Connected);
        assert_eq!(err.event, ConnEvent::ConnectStarted);
        assert!(format!("{}", err).contains("CONNECTED"));

        assert!(ConnState::Unconnected.on(ConnEvent::Lost).is_err());
        assert!(ConnState::Connected.on(ConnEvent::Accepted).is_err());
        assert!(ConnState::Failed.on(ConnEvent::HandshakeComplete).is_err());
    }

    #[test]
    fn test_connected_reachable_only_through_handshake() {
        for state in ALL_STATES {
            for event in [
                ConnEvent::ConnectRequested,
                ConnEvent::ConnectStarted,
                ConnEvent::ConnectEstablished,
                ConnEvent::Accepted,
                ConnEvent::RetryScheduled,
                ConnEvent::Exhausted,
                ConnEvent::Rejected,
                ConnEvent::Lost,
                ConnEvent::Reset,
                ConnEvent::Abandoned,
            ] {
                assert_ne!(state.on(event), Ok(ConnState::Connected));
            }
        }
    }

    #[test]
    fn test_race_resolution() {
        let low = ProcessName::new("x", 0).unwrap();
        let high = ProcessName::new("x", 1).unwrap();

        // we are the lower identity: the remote wins
        assert_eq!(
            resolve_race(ConnState::Connecting, &low, &high),
            RaceOutcome::AbandonOwn
        );
        // we are the higher identity: keep ours
        assert_eq!(
            resolve_race(ConnState::ConnectAck, &high, &low),
            RaceOutcome::RejectIncoming
        );
        assert_eq!(
            resolve_race(ConnState::Unconnected, &high, &low),
            RaceOutcome::NoConflict
        );
        assert_eq!(
            resolve_race(ConnState::Closed, &low, &high),
            RaceOutcome::NoConflict
        );
    }

    #[test]
    fn test_race_is_symmetric() {
        let a = ProcessName::new("a", 7).unwrap();
        let b = ProcessName::new("b", 0).unwrap();
        for state in ALL_STATES.into_iter().filter(|s| s.is_active()) {
            let at_a = resolve_race(state, &a, &b);
            let at_b = resolve_race(state, &b, &a);
            // exactly one side keeps its own connection
            assert_ne!(at_a, at_b);
            assert_eq!(at_a, RaceOutcome::AbandonOwn);
            assert_eq!(at_b, RaceOutcome::RejectIncoming);
        }
    }
}

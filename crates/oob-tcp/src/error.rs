//! TCP transport error types

use oob_core::CoreError;
use thiserror::Error;

/// Reasons a handshake is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeRejection {
    /// First frame was not an identification frame
    #[error("unexpected message class: {0}")]
    UnexpectedClass(String),

    /// Payload did not hold a NUL-terminated version string
    #[error("malformed handshake payload")]
    MalformedPayload,

    /// Version strings differ
    #[error("version mismatch: expected {expected}, received {received}")]
    VersionMismatch {
        /// Our version
        expected: String,
        /// Version announced by the remote
        received: String,
    },

    /// The handshake was addressed to someone else
    #[error("handshake addressed to {0}")]
    WrongDestination(String),

    /// Remote identity is not the peer we dialed
    #[error("unexpected peer: expected {expected}, got {got}")]
    UnexpectedPeer {
        /// Peer we connected to
        expected: String,
        /// Identity it announced
        got: String,
    },

    /// The authenticator refused the credential
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Announced payload exceeds the configured maximum
    #[error("handshake payload too large: {0} bytes")]
    Oversize(u32),
}

/// TCP transport errors
#[derive(Debug, Error)]
pub enum TcpError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire decoding error
    #[error("decode error: {0}")]
    Decode(#[from] CoreError),

    /// Connection refused during the handshake
    #[error("connection refused: {0}")]
    Refused(#[from] HandshakeRejection),

    /// Invalid configuration
    #[error("invalid config: {0}")]
    Config(String),

    /// Address could not be parsed or resolved
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Remote closed the connection
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Blocking-style exchange did not finish in time
    #[error("timeout: {0}")]
    Timeout(String),

    /// Received frame larger than allowed
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Announced size
        size: u32,
        /// Configured maximum
        max: u32,
    },

    /// Reactor is gone
    #[error("transport not running")]
    NotRunning,

    /// Component already initialized or shut down
    #[error("channel closed")]
    ChannelClosed,
}

impl TcpError {
    /// Returns true for errors that classify as a refused connection.
    pub fn is_refused(&self) -> bool {
        matches!(self, TcpError::Refused(_))
    }
}

/// Result type for TCP transport operations
pub type TcpResult<T> = Result<T, TcpError>;

/// True when a write error means the connection itself is gone.
pub(crate) fn is_connection_loss(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: TcpError = io_err.into();
        let msg = format!("{}", err);
        assert!(msg.contains("IO error"));
        assert!(!err.is_refused());
    }

    #[test]
    fn test_error_refused_version() {
        let err: TcpError = HandshakeRejection::VersionMismatch {
            expected: "1.0".into(),
            received: "2.0".into(),
        }
        .into();
        assert!(err.is_refused());
        let msg = format!("{}", err);
        assert!(msg.contains("connection refused"));
        assert!(msg.contains("1.0"));
        assert!(msg.contains("2.0"));
    }

    #[test]
    fn test_error_decode() {
        let err: TcpError = CoreError::UnknownMessageClass(42).into();
        assert!(format!("{}", err).contains("42"));
    }

    #[test]
    fn test_error_too_large() {
        let err = TcpError::MessageTooLarge { size: 10, max: 5 };
        let msg = format!("{}", err);
        assert!(msg.contains("10"));
        assert!(msg.contains("max 5"));
    }

    #[test]
    fn test_error_not_running() {
        let msg = format!("{}", TcpError::NotRunning);
        assert!(msg.contains("not running"));
    }

    #[test]
    fn test_connection_loss_kinds() {
        assert!(is_connection_loss(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_connection_loss(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_connection_loss(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_connection_loss(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[test]
    fn test_tcp_result_err() {
        let result: TcpResult<u32> = Err(TcpError::ConnectionClosed);
        assert!(result.is_err());
    }
}

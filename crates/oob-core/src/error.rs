//! Core error types

use crate::name::ProcessName;
use thiserror::Error;

/// Errors raised while building or decoding core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Namespace longer than the wire field allows
    #[error("namespace too long: {0} bytes (max 255)")]
    NamespaceTooLong(usize),

    /// Malformed process name
    #[error("invalid process name: {0}")]
    InvalidName(String),

    /// Message class value not known on the wire
    #[error("unknown message class: {0}")]
    UnknownMessageClass(u32),

    /// Buffer shorter than a full header
    #[error("truncated header: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        got: usize,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Final status handed to the originator of a send.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The destination could not be reached over this transport
    #[error("peer unreachable: {0}")]
    Unreachable(ProcessName),

    /// Writing the message to the socket failed
    #[error("write failed: {0}")]
    Io(String),

    /// Payload exceeds the largest frame peers accept
    #[error("message too large: {size} bytes (max {max})")]
    TooLarge {
        /// Payload length
        size: usize,
        /// Configured maximum
        max: u32,
    },

    /// The transport shut down before the message went out
    #[error("transport shut down")]
    Shutdown,
}

//! # oob-core
//!
//! Shared vocabulary of the out-of-band transport.
//!
//! This crate provides:
//! - `ProcessName`: namespace + rank identity of a process in the job
//! - `MessageHeader`: the fixed-size wire header, big-endian on the wire
//! - `MessageClass`: ident / probe / ping / user frames
//! - `OutboundMessage` / `InboundMessage`: what callers hand in and get back
//!
//! ## Wire layout
//!
//! ```text
//! +-------------+----------------+----------------+-------+-----+-----+--------+
//! | scon_handle | origin (260 B) | dst (260 B)    | class | tag | seq | nbytes |
//! |     u32     | nspace[256]+u32| nspace[256]+u32|  u32  | u32 | u32 |  u32   |
//! +-------------+----------------+----------------+-------+-----+-----+--------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod header;
mod message;
mod name;

pub use error::{CoreError, CoreResult, SendError};
pub use header::{MessageClass, MessageHeader, HEADER_SIZE, IDENTITY_WIRE_LEN, NSPACE_WIRE_LEN};
pub use message::{InboundMessage, OutboundMessage, SendCompletion, SendReceipt};
pub use name::{ProcessName, MAX_NSPACE_LEN};

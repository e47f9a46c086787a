//! Outbound and inbound message types

use crate::error::SendError;
use crate::header::{MessageClass, MessageHeader};
use crate::name::ProcessName;
use bytes::Bytes;
use std::fmt;
use tokio::sync::oneshot;

/// Sender half used to report the final status of a send.
pub type SendCompletion = oneshot::Sender<Result<(), SendError>>;

/// Receiver half returned to the caller of a send.
pub type SendReceipt = oneshot::Receiver<Result<(), SendError>>;

/// A message handed to the transport for delivery.
pub struct OutboundMessage {
    /// Sender
    pub origin: ProcessName,
    /// Final destination
    pub dst: ProcessName,
    /// Application tag
    pub tag: u32,
    /// Sequence number
    pub seq_num: u32,
    /// Frame kind, `User` unless built by the transport itself
    pub msg_class: MessageClass,
    /// Payload bytes
    pub payload: Bytes,
    completion: Option<SendCompletion>,
}

impl OutboundMessage {
    /// Create a user message.
    pub fn new(origin: ProcessName, dst: ProcessName, tag: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            origin,
            dst,
            tag,
            seq_num: 0,
            msg_class: MessageClass::User,
            payload: payload.into(),
            completion: None,
        }
    }

    /// Header-only keepalive frame.
    pub fn ping(origin: ProcessName, dst: ProcessName) -> Self {
        Self {
            msg_class: MessageClass::Ping,
            ..Self::new(origin, dst, 0, Bytes::new())
        }
    }

    /// Rebuild a message for relay from a received header and payload.
    ///
    /// Origin, destination, tag and sequence number are kept as received.
    pub fn relay(hdr: &MessageHeader, payload: Bytes) -> Self {
        Self {
            origin: hdr.origin.clone(),
            dst: hdr.dst.clone(),
            tag: hdr.tag,
            seq_num: hdr.seq_num,
            msg_class: hdr.msg_class,
            payload,
            completion: None,
        }
    }

    /// Set the sequence number.
    pub fn with_seq(mut self, seq_num: u32) -> Self {
        self.seq_num = seq_num;
        self
    }

    /// Attach a completion channel and return the receiving side.
    pub fn with_completion(mut self) -> (Self, SendReceipt) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        (self, rx)
    }

    /// Returns true if someone is waiting for the final status.
    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Fails with [`SendError::TooLarge`] when the payload exceeds `max` bytes.
    pub fn check_size(&self, max: u32) -> Result<(), SendError> {
        match u32::try_from(self.payload.len()) {
            Ok(len) if len <= max => Ok(()),
            _ => Err(SendError::TooLarge {
                size: self.payload.len(),
                max,
            }),
        }
    }

    /// Header describing this message on the wire.
    ///
    /// The size field saturates; run [`check_size`](Self::check_size) before
    /// putting the message on a socket.
    pub fn header(&self) -> MessageHeader {
        let nbytes = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        MessageHeader::new(
            self.origin.clone(),
            self.dst.clone(),
            self.msg_class,
            self.tag,
            self.seq_num,
            nbytes,
        )
    }

    /// Report the final status. A second call is a no-op.
    pub fn complete(&mut self, result: Result<(), SendError>) {
        if let Some(tx) = self.completion.take() {
            // receiver may have been dropped
            let _ = tx.send(result);
        }
    }
}

impl fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("origin", &self.origin)
            .field("dst", &self.dst)
            .field("class", &self.msg_class)
            .field("tag", &self.tag)
            .field("seq_num", &self.seq_num)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// A message delivered to this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender
    pub origin: ProcessName,
    /// Destination (this process)
    pub dst: ProcessName,
    /// Application tag
    pub tag: u32,
    /// Sequence number
    pub seq_num: u32,
    /// Payload bytes
    pub payload: Bytes,
}

impl InboundMessage {
    /// Build from a decoded header and its payload.
    pub fn from_parts(hdr: MessageHeader, payload: Bytes) -> Self {
        Self {
            origin: hdr.origin,
            dst: hdr.dst,
            tag: hdr.tag,
            seq_num: hdr.seq_num,
            payload,
        }
    }
}

impl From<OutboundMessage> for InboundMessage {
    fn from(msg: OutboundMessage) -> Self {
        Self {
            origin: msg.origin,
            dst: msg.dst,
            tag: msg.tag,
            seq_num: msg.seq_num,
            payload: msg.payload,
        }
    }
}

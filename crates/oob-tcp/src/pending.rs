//! Resumable send and receive trackers
//!
//! A tracker owns the bytes of one message and remembers how far the
//! non-blocking socket got. Calling `pump` again after `WouldBlock`
//! resumes exactly where the last call stopped.

use crate::error::TcpError;
use bytes::{Bytes, BytesMut};
use oob_core::{MessageHeader, OutboundMessage, HEADER_SIZE};
use std::io;
use tokio::net::TcpStream;

/// Non-blocking byte I/O used by the pumps.
pub(crate) trait ByteStream {
    /// Read without waiting; `WouldBlock` when nothing is available.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    /// Write without waiting; `WouldBlock` when the send buffer is full.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl ByteStream for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

/// Result of one send pump call.
#[derive(Debug)]
pub(crate) enum SendProgress {
    /// Header and payload are on the wire
    Complete,
    /// Socket buffer full, wait for writability
    WouldBlock,
    /// Hard write error
    Failed(io::Error),
}

/// Outbound message being written.
pub(crate) struct PendingSend {
    msg: OutboundMessage,
    hdr: [u8; HEADER_SIZE],
    hdr_sent: usize,
    offset: usize,
}

impl PendingSend {
    pub(crate) fn new(msg: OutboundMessage) -> Self {
        let hdr = msg.header().to_network();
        Self {
            msg,
            hdr,
            hdr_sent: 0,
            offset: 0,
        }
    }

    /// Bytes still to be written, header included.
    #[cfg(test)]
    pub(crate) fn remaining(&self) -> usize {
        (HEADER_SIZE - self.hdr_sent) + (self.msg.payload.len() - self.offset)
    }

    pub(crate) fn payload_len(&self) -> usize {
        self.msg.payload.len()
    }

    /// True once any byte of this message reached the socket.
    pub(crate) fn started(&self) -> bool {
        self.hdr_sent > 0
    }

    #[cfg(test)]
    pub(crate) fn message(&self) -> &OutboundMessage {
        &self.msg
    }

    /// Write as much as the socket takes.
    pub(crate) fn pump<S: ByteStream + ?Sized>(&mut self, stream: &S) -> SendProgress {
        loop {
            let chunk = if self.hdr_sent < HEADER_SIZE {
                &self.hdr[self.hdr_sent..]
            } else if self.offset < self.msg.payload.len() {
                &self.msg.payload[self.offset..]
            } else {
                return SendProgress::Complete;
            };

            match stream.try_write(chunk) {
                Ok(0) => {
                    return SendProgress::Failed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ))
                }
                Ok(n) => {
                    if self.hdr_sent < HEADER_SIZE {
                        self.hdr_sent += n;
                    } else {
                        self.offset += n;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return SendProgress::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return SendProgress::Failed(e),
            }
        }
    }

    /// Start over on a new connection.
    pub(crate) fn restart(&mut self) {
        self.hdr_sent = 0;
        self.offset = 0;
    }

    pub(crate) fn into_message(self) -> OutboundMessage {
        self.msg
    }
}

/// Result of one receive pump call.
#[derive(Debug)]
pub(crate) enum RecvProgress {
    /// Nothing more available right now
    WouldBlock,
    /// Orderly shutdown by the remote
    Closed,
    /// A whole frame arrived
    Complete(MessageHeader, Bytes),
    /// Read error or undecodable header
    Failed(TcpError),
}

/// Inbound frame being reassembled.
pub(crate) struct PendingRecv {
    hdr_buf: [u8; HEADER_SIZE],
    hdr_read: usize,
    hdr: Option<MessageHeader>,
    data: BytesMut,
    offset: usize,
    max_msg_size: u32,
}

impl PendingRecv {
    pub(crate) fn new(max_msg_size: u32) -> Self {
        Self {
            hdr_buf: [0u8; HEADER_SIZE],
            hdr_read: 0,
            hdr: None,
            data: BytesMut::new(),
            offset: 0,
            max_msg_size,
        }
    }

    /// Bytes still expected for the current frame, if its size is known.
    #[cfg(test)]
    pub(crate) fn remaining(&self) -> usize {
        match &self.hdr {
            None => HEADER_SIZE - self.hdr_read,
            Some(_) => self.data.len() - self.offset,
        }
    }

    /// True while part of a frame has been read.
    pub(crate) fn in_progress(&self) -> bool {
        self.hdr_read > 0
    }

    /// Read as much as is available, returning at most one complete frame.
    pub(crate) fn pump<S: ByteStream + ?Sized>(&mut self, stream: &S) -> RecvProgress {
        loop {
            if self.hdr.is_none() {
                match stream.try_read(&mut self.hdr_buf[self.hdr_read..]) {
                    Ok(0) => return RecvProgress::Closed,
                    Ok(n) => {
                        self.hdr_read += n;
                        if self.hdr_read < HEADER_SIZE {
                            continue;
                        }
                        let hdr = match MessageHeader::from_network(&self.hdr_buf) {
                            Ok(hdr) => hdr,
                            Err(e) => return RecvProgress::Failed(e.into()),
                        };
                        if hdr.nbytes > self.max_msg_size {
                            return RecvProgress::Failed(TcpError::MessageTooLarge {
                                size: hdr.nbytes,
                                max: self.max_msg_size,
                            });
                        }
                        self.data = BytesMut::zeroed(hdr.nbytes as usize);
                        self.offset = 0;
                        self.hdr = Some(hdr);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return RecvProgress::WouldBlock
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return RecvProgress::Failed(e.into()),
                }
            } else if self.offset == self.data.len() {
                return self.finish();
            } else {
                match stream.try_read(&mut self.data[self.offset..]) {
                    Ok(0) => return RecvProgress::Closed,
                    Ok(n) => self.offset += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return RecvProgress::WouldBlock
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return RecvProgress::Failed(e.into()),
                }
            }
        }
    }

    fn finish(&mut self) -> RecvProgress {
        let payload = std::mem::take(&mut self.data).freeze();
        self.hdr_read = 0;
        self.offset = 0;
        match self.hdr.take() {
            Some(hdr) => RecvProgress::Complete(hdr, payload),
            None => RecvProgress::Failed(TcpError::ConnectionClosed),
        }
    }
}

//! Fixed-size wire header

use crate::error::{CoreError, CoreResult};
use crate::name::ProcessName;
use bytes::{Buf, BufMut};

/// Bytes reserved for the NUL-padded namespace of an identity on the wire.
pub const NSPACE_WIRE_LEN: usize = 256;

/// Bytes of one encoded identity: namespace field plus u32 rank.
pub const IDENTITY_WIRE_LEN: usize = NSPACE_WIRE_LEN + 4;

/// Size of an encoded header.
pub const HEADER_SIZE: usize = 4 + 2 * IDENTITY_WIRE_LEN + 4 * 4;

/// Kind of frame carried by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageClass {
    /// Connection handshake carrying version and credential
    Ident = 1,
    /// Liveness probe, echoed by the acceptor
    Probe = 2,
    /// Keepalive frame, consumed on receipt
    Ping = 3,
    /// Application payload
    User = 4,
}

impl MessageClass {
    /// Wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MessageClass {
    type Error = CoreError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Ident),
            2 => Ok(Self::Probe),
            3 => Ok(Self::Ping),
            4 => Ok(Self::User),
            other => Err(CoreError::UnknownMessageClass(other)),
        }
    }
}

/// Message header, kept in host order in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Opaque connection handle, carried through unchanged
    pub scon_handle: u32,
    /// Sender of the message
    pub origin: ProcessName,
    /// Final destination
    pub dst: ProcessName,
    /// Frame kind
    pub msg_class: MessageClass,
    /// Application tag
    pub tag: u32,
    /// Sequence number assigned by the sender
    pub seq_num: u32,
    /// Payload length following the header
    pub nbytes: u32,
}

impl MessageHeader {
    /// Create a header with a zero connection handle.
    pub fn new(
        origin: ProcessName,
        dst: ProcessName,
        msg_class: MessageClass,
        tag: u32,
        seq_num: u32,
        nbytes: u32,
    ) -> Self {
        Self {
            scon_handle: 0,
            origin,
            dst,
            msg_class,
            tag,
            seq_num,
            nbytes,
        }
    }

    /// Encode the whole header into network byte order.
    pub fn to_network(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(self.scon_handle);
        put_identity(&mut buf, &self.origin);
        put_identity(&mut buf, &self.dst);
        buf.put_u32(self.msg_class.as_u32());
        buf.put_u32(self.tag);
        buf.put_u32(self.seq_num);
        buf.put_u32(self.nbytes);
        debug_assert!(buf.is_empty());
        out
    }

    /// Decode a header from a buffer holding at least [`HEADER_SIZE`] bytes.
    pub fn from_network(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::Truncated {
                needed: HEADER_SIZE,
                got: data.len(),
            });
        }
        let mut buf = &data[..HEADER_SIZE];
        let scon_handle = buf.get_u32();
        let origin = get_identity(&mut buf)?;
        let dst = get_identity(&mut buf)?;
        let msg_class = MessageClass::try_from(buf.get_u32())?;
        let tag = buf.get_u32();
        let seq_num = buf.get_u32();
        let nbytes = buf.get_u32();
        Ok(Self {
            scon_handle,
            origin,
            dst,
            msg_class,
            tag,
            seq_num,
            nbytes,
        })
    }
}

fn put_identity(buf: &mut &mut [u8], name: &ProcessName) {
    let ns = name.nspace().as_bytes();
    buf.put_slice(ns);
    buf.put_bytes(0, NSPACE_WIRE_LEN - ns.len());
    buf.put_u32(name.rank());
}

fn get_identity(buf: &mut &[u8]) -> CoreResult<ProcessName> {
    let field = &buf[..NSPACE_WIRE_LEN];
    let end = field
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| CoreError::InvalidName("namespace not NUL terminated".into()))?;
    let nspace = std::str::from_utf8(&field[..end])
        .map_err(|e| CoreError::InvalidName(format!("namespace not utf-8: {}", e)))?
        .to_string();
    buf.advance(NSPACE_WIRE_LEN);
    let rank = buf.get_u32();
    ProcessName::from_parts(nspace, rank)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(ns: &str, rank: u32) -> ProcessName {
        ProcessName::new(ns, rank).unwrap()
    }

    fn sample() -> MessageHeader {
        MessageHeader {
            scon_handle: 7,
            origin: name("x", 0),
            dst: name("y", 1),
            msg_class: MessageClass::User,
            tag: 0xdead_beef,
            seq_num: 3,
            nbytes: 12,
        }
    }

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 540);
        assert_eq!(IDENTITY_WIRE_LEN, 260);
    }

    #[test]
    fn test_header_roundtrip() {
        let hdr = sample();
        let wire = hdr.to_network();
        assert_eq!(MessageHeader::from_network(&wire).unwrap(), hdr);
    }

    #[test]
    fn test_header_big_endian_layout() {
        let wire = sample().to_network();
        assert_eq!(&wire[0..4], &[0, 0, 0, 7]);
        assert_eq!(wire[4], b'x');
        assert_eq!(wire[5], 0);
        // origin rank
        assert_eq!(&wire[4 + NSPACE_WIRE_LEN..4 + IDENTITY_WIRE_LEN], &[0, 0, 0, 0]);
        let tail = 4 + 2 * IDENTITY_WIRE_LEN;
        assert_eq!(&wire[tail..tail + 4], &[0, 0, 0, 4]);
        assert_eq!(&wire[tail + 4..tail + 8], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&wire[tail + 12..tail + 16], &[0, 0, 0, 12]);
    }

    #[test]
    fn test_header_unknown_class() {
        let mut wire = sample().to_network();
        let tail = 4 + 2 * IDENTITY_WIRE_LEN;
        wire[tail + 3] = 9;
        assert_eq!(
            MessageHeader::from_network(&wire),
            Err(CoreError::UnknownMessageClass(9))
        );
    }

    #[test]
    fn test_header_truncated() {
        let wire = sample().to_network();
        let err = MessageHeader::from_network(&wire[..100]).unwrap_err();
        assert_eq!(
            err,
            CoreError::Truncated {
                needed: HEADER_SIZE,
                got: 100
            }
        );
    }

    #[test]
    fn test_header_unterminated_nspace() {
        let mut wire = sample().to_network();
        for b in &mut wire[4..4 + NSPACE_WIRE_LEN] {
            *b = b'a';
        }
        assert!(matches!(
            MessageHeader::from_network(&wire),
            Err(CoreError::InvalidName(_))
        ));
    }

    #[test]
    fn test_header_max_nspace() {
        let mut hdr = sample();
        hdr.origin = name(&"n".repeat(crate::MAX_NSPACE_LEN), u32::MAX - 1);
        let back = MessageHeader::from_network(&hdr.to_network()).unwrap();
        assert_eq!(back.origin, hdr.origin);
    }

    #[test]
    fn test_header_unknown_identity_roundtrip() {
        let mut hdr = sample();
        hdr.msg_class = MessageClass::Probe;
        hdr.dst = ProcessName::unknown();
        hdr.nbytes = 0;
        let back = MessageHeader::from_network(&hdr.to_network()).unwrap();
        assert!(back.dst.is_unknown());
    }

    #[test]
    fn test_message_class_values() {
        assert_eq!(MessageClass::Ident.as_u32(), 1);
        assert_eq!(MessageClass::User.as_u32(), 4);
        assert_eq!(MessageClass::try_from(3).unwrap(), MessageClass::Ping);
        assert!(MessageClass::try_from(0).is_err());
    }
}

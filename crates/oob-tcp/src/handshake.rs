//! Identification handshake
//!
//! The initiator writes an `Ident` header whose payload is the version string,
//! a NUL byte and the credential. The acceptor validates it and answers with
//! its own `Ident` frame. A `Probe` header instead of an `Ident` asks the
//! acceptor to echo its identity and hang up.
//!
//! Handshake I/O is blocking-style: a bounded busy loop over a non-blocking
//! socket that retries on `WouldBlock` and `Interrupted`.

use crate::error::{HandshakeRejection, TcpError, TcpResult};
use crate::pending::ByteStream;
use bytes::Bytes;
use oob_core::{MessageClass, MessageHeader, ProcessName, HEADER_SIZE};
use std::io;
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on an identification payload.
pub(crate) const MAX_IDENT_PAYLOAD: u32 = 64 * 1024;

/// Credential blob presented during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Name of the scheme that produced the bytes
    pub method: String,
    /// Opaque credential bytes
    pub bytes: Vec<u8>,
}

/// Pluggable credential exchange.
pub trait Authenticator: Send + Sync {
    /// Credential to present to remote processes.
    fn credential(&self) -> Credential;

    /// Check a credential received from `peer`; returns the method that accepted it.
    fn authenticate(&self, peer: &ProcessName, credential: &[u8]) -> Result<String, String>;
}

/// Sends an empty credential and accepts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuthenticator;

impl Authenticator for NullAuthenticator {
    fn credential(&self) -> Credential {
        Credential {
            method: "none".into(),
            bytes: Vec::new(),
        }
    }

    fn authenticate(&self, _peer: &ProcessName, _credential: &[u8]) -> Result<String, String> {
        Ok("none".into())
    }
}

/// Shared-secret check: both sides must present the same token.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    token: Vec<u8>,
}

impl TokenAuthenticator {
    /// Authenticator presenting and expecting `token`.
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Build from a hex string.
    pub fn from_hex(token: &str) -> Result<Self, String> {
        hex::decode(token.trim_start_matches("0x"))
            .map(Self::new)
            .map_err(|e| format!("bad token: {}", e))
    }
}

impl Authenticator for TokenAuthenticator {
    fn credential(&self) -> Credential {
        Credential {
            method: "token".into(),
            bytes: self.token.clone(),
        }
    }

    fn authenticate(&self, peer: &ProcessName, credential: &[u8]) -> Result<String, String> {
        if credential == self.token.as_slice() {
            Ok("token".into())
        } else {
            Err(format!(
                "token from {} does not match ({} bytes, prefix {})",
                peer,
                credential.len(),
                hex::encode(&credential[..credential.len().min(4)])
            ))
        }
    }
}

/// Version string, NUL, credential.
pub(crate) fn ident_payload(version: &str, credential: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(version.len() + 1 + credential.len());
    payload.extend_from_slice(version.as_bytes());
    payload.push(0);
    payload.extend_from_slice(credential);
    payload
}

/// Split an identification payload into version and credential.
pub(crate) fn parse_ident_payload(payload: &[u8]) -> Result<(&str, &[u8]), HandshakeRejection> {
    let nul = payload
        .iter()
        .position(|b| *b == 0)
        .ok_or(HandshakeRejection::MalformedPayload)?;
    let version =
        std::str::from_utf8(&payload[..nul]).map_err(|_| HandshakeRejection::MalformedPayload)?;
    Ok((version, &payload[nul + 1..]))
}

/// Full identification frame from `local` to `dst`.
pub(crate) fn ident_frame(
    local: &ProcessName,
    dst: &ProcessName,
    version: &str,
    credential: &[u8],
) -> Vec<u8> {
    let payload = ident_payload(version, credential);
    let hdr = MessageHeader::new(
        local.clone(),
        dst.clone(),
        MessageClass::Ident,
        0,
        0,
        payload.len() as u32,
    );
    let mut frame = hdr.to_network().to_vec();
    frame.extend_from_slice(&payload);
    frame
}

/// Check a received identification frame.
///
/// Checks run in order: class, payload shape, version, destination, expected
/// origin (initiator side only), credential.
pub(crate) fn validate_ident(
    hdr: &MessageHeader,
    payload: &[u8],
    version: &str,
    auth: &dyn Authenticator,
    local: &ProcessName,
    expected_origin: Option<&ProcessName>,
) -> Result<String, HandshakeRejection> {
    if hdr.msg_class != MessageClass::Ident {
        return Err(HandshakeRejection::UnexpectedClass(format!(
            "{:?}",
            hdr.msg_class
        )));
    }
    let (received, credential) = parse_ident_payload(payload)?;
    if received != version {
        return Err(HandshakeRejection::VersionMismatch {
            expected: version.to_string(),
            received: received.to_string(),
        });
    }
    if &hdr.dst != local {
        return Err(HandshakeRejection::WrongDestination(hdr.dst.to_string()));
    }
    if let Some(expected) = expected_origin {
        if &hdr.origin != expected {
            return Err(HandshakeRejection::UnexpectedPeer {
                expected: expected.to_string(),
                got: hdr.origin.to_string(),
            });
        }
    }
    auth.authenticate(&hdr.origin, credential)
        .map_err(HandshakeRejection::AuthenticationFailed)
}

/// Write all of `buf`, spinning on `WouldBlock` until `timeout`.
pub(crate) fn write_all_spin<S: ByteStream + ?Sized>(
    stream: &S,
    buf: &[u8],
    timeout: Duration,
) -> TcpResult<()> {
    let deadline = Instant::now() + timeout;
    let mut written = 0;
    while written < buf.len() {
        match stream.try_write(&buf[written..]) {
            Ok(0) => return Err(TcpError::ConnectionClosed),
            Ok(n) => written += n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                if Instant::now() >= deadline {
                    return Err(TcpError::Timeout(format!(
                        "handshake write stalled after {} of {} bytes",
                        written,
                        buf.len()
                    )));
                }
                std::thread::yield_now();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Fill `buf`, spinning on `WouldBlock` until `timeout`.
pub(crate) fn read_exact_spin<S: ByteStream + ?Sized>(
    stream: &S,
    buf: &mut [u8],
    timeout: Duration,
) -> TcpResult<()> {
    let deadline = Instant::now() + timeout;
    let mut read = 0;
    while read < buf.len() {
        match stream.try_read(&mut buf[read..]) {
            Ok(0) => return Err(TcpError::ConnectionClosed),
            Ok(n) => read += n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                if Instant::now() >= deadline {
                    return Err(TcpError::Timeout(format!(
                        "handshake read stalled after {} of {} bytes",
                        read,
                        buf.len()
                    )));
                }
                std::thread::yield_now();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read one header and its payload, blocking-style.
pub(crate) fn read_frame<S: ByteStream + ?Sized>(
    stream: &S,
    timeout: Duration,
) -> TcpResult<(MessageHeader, Bytes)> {
    let mut hdr_buf = [0u8; HEADER_SIZE];
    read_exact_spin(stream, &mut hdr_buf, timeout)?;
    let hdr = MessageHeader::from_network(&hdr_buf)?;
    if hdr.nbytes > MAX_IDENT_PAYLOAD {
        return Err(HandshakeRejection::Oversize(hdr.nbytes).into());
    }
    let mut payload = vec![0u8; hdr.nbytes as usize];
    read_exact_spin(stream, &mut payload, timeout)?;
    debug!(origin = %hdr.origin, class = ?hdr.msg_class, nbytes = hdr.nbytes, "handshake frame read");
    Ok((hdr, Bytes::from(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::mock::{ScriptedStream, Step};

    fn name(ns: &str, rank: u32) -> ProcessName {
        ProcessName::new(ns, rank).unwrap()
    }

    fn ident(origin: &ProcessName, dst: &ProcessName, version: &str) -> (MessageHeader, Vec<u8>) {
        let payload = ident_payload(version, b"");
        let hdr = MessageHeader::new(
            origin.clone(),
            dst.clone(),
            MessageClass::Ident,
            0,
            0,
            payload.len() as u32,
        );
        (hdr, payload)
    }

    #[test]
    fn test_payload_layout() {
        let payload = ident_payload("1.0", &[0xaa, 0xbb]);
        assert_eq!(payload, b"1.0\0\xaa\xbb");
        let (version, cred) = parse_ident_payload(&payload).unwrap();
        assert_eq!(version, "1.0");
        assert_eq!(cred, &[0xaa, 0xbb]);
    }

    #[test]
    fn test_payload_without_nul() {
        assert_eq!(
            parse_ident_payload(b"1.0"),
            Err(HandshakeRejection::MalformedPayload)
        );
    }

    #[test]
    fn test_validate_ok() {
        let a = name("x", 0);
        let b = name("x", 1);
        let (hdr, payload) = ident(&a, &b, "1.0");
        let method = validate_ident(&hdr, &payload, "1.0", &NullAuthenticator, &b, None).unwrap();
        assert_eq!(method, "none");
        let method =
            validate_ident(&hdr, &payload, "1.0", &NullAuthenticator, &b, Some(&a)).unwrap();
        assert_eq!(method, "none");
    }

    #[test]
    fn test_validate_version_mismatch() {
        let a = name("x", 0);
        let b = name("x", 1);
        let (hdr, payload) = ident(&a, &b, "2.0");
        let err = validate_ident(&hdr, &payload, "1.0", &NullAuthenticator, &b, None).unwrap_err();
        assert_eq!(
            err,
            HandshakeRejection::VersionMismatch {
                expected: "1.0".into(),
                received: "2.0".into()
            }
        );
    }

    #[test]
    fn test_validate_class_first() {
        let a = name("x", 0);
        let b = name("x", 1);
        let (mut hdr, payload) = ident(&a, &b, "2.0");
        hdr.msg_class = MessageClass::User;
        let err = validate_ident(&hdr, &payload, "1.0", &NullAuthenticator, &b, None).unwrap_err();
        assert!(matches!(err, HandshakeRejection::UnexpectedClass(_)));
    }

    #[test]
    fn test_validate_destination_and_origin() {
        let a = name("x", 0);
        let b = name("x", 1);
        let c = name("x", 2);
        let (hdr, payload) = ident(&a, &b, "1.0");
        assert!(matches!(
            validate_ident(&hdr, &payload, "1.0", &NullAuthenticator, &c, None),
            Err(HandshakeRejection::WrongDestination(_))
        ));
        assert!(matches!(
            validate_ident(&hdr, &payload, "1.0", &NullAuthenticator, &b, Some(&c)),
            Err(HandshakeRejection::UnexpectedPeer { .. })
        ));
    }

    #[test]
    fn test_token_authenticator() {
        let auth = TokenAuthenticator::from_hex("0xdeadbeef").unwrap();
        assert_eq!(auth.credential().bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        let peer = name("x", 0);
        assert_eq!(auth.authenticate(&peer, &[0xde, 0xad, 0xbe, 0xef]), Ok("token".into()));
        let err = auth.authenticate(&peer, &[1, 2]).unwrap_err();
        assert!(err.contains("0102"));
        assert!(TokenAuthenticator::from_hex("zz").is_err());
    }

    #[test]
    fn test_validate_auth_failure() {
        let a = name("x", 0);
        let b = name("x", 1);
        let payload = ident_payload("1.0", b"wrong");
        let hdr = MessageHeader::new(a, b.clone(), MessageClass::Ident, 0, 0, payload.len() as u32);
        let auth = TokenAuthenticator::new(b"right".to_vec());
        assert!(matches!(
            validate_ident(&hdr, &payload, "1.0", &auth, &b, None),
            Err(HandshakeRejection::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_spin_write_retries_would_block() {
        let stream = ScriptedStream::new(vec![
            Step::WouldBlock,
            Step::Ready(2),
            Step::Interrupted,
            Step::Ready(10),
        ]);
        write_all_spin(&stream, b"abcdef", Duration::from_secs(1)).unwrap();
        assert_eq!(&stream.written.borrow()[..], b"abcdef");
    }

    #[test]
    fn test_spin_write_times_out() {
        // the script runs dry and keeps reporting WouldBlock
        let stream = ScriptedStream::new(vec![]);
        let err = write_all_spin(&stream, b"abc", Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TcpError::Timeout(_)));
    }

    #[test]
    fn test_read_frame() {
        let a = name("x", 0);
        let b = name("x", 1);
        let frame = ident_frame(&a, &b, "1.0", b"cred");
        let stream = ScriptedStream::new(vec![
            Step::Ready(300),
            Step::WouldBlock,
            Step::Ready(HEADER_SIZE),
            Step::Ready(64),
        ])
        .with_inbound(&frame);
        let (hdr, payload) = read_frame(&stream, Duration::from_secs(1)).unwrap();
        assert_eq!(hdr.origin, a);
        assert_eq!(hdr.msg_class, MessageClass::Ident);
        assert_eq!(&payload[..], b"1.0\0cred");
    }

    #[test]
    fn test_read_frame_eof() {
        let stream = ScriptedStream::new(vec![Step::Eof]);
        assert!(matches!(
            read_frame(&stream, Duration::from_secs(1)),
            Err(TcpError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_read_frame_oversize() {
        let a = name("x", 0);
        let hdr = MessageHeader::new(a.clone(), a, MessageClass::Ident, 0, 0, MAX_IDENT_PAYLOAD + 1);
        let stream =
            ScriptedStream::new(vec![Step::Ready(HEADER_SIZE)]).with_inbound(&hdr.to_network());
        let err = read_frame(&stream, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_refused());
    }
}

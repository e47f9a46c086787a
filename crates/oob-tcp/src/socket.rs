//! Socket creation and option tuning

use crate::config::TcpConfig;
use crate::pending::ByteStream;
use socket2::{SockRef, TcpKeepalive};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tokio::net::{TcpSocket, TcpStream};
use tracing::warn;

/// Apply no-delay, buffer sizes and keepalive. Failures are logged, not fatal.
pub(crate) fn set_options(sock: SockRef<'_>, config: &TcpConfig) {
    if let Err(e) = sock.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY");
    }
    if config.sndbuf > 0 {
        if let Err(e) = sock.set_send_buffer_size(config.sndbuf) {
            warn!(size = config.sndbuf, error = %e, "failed to set SO_SNDBUF");
        }
    }
    if config.rcvbuf > 0 {
        if let Err(e) = sock.set_recv_buffer_size(config.rcvbuf) {
            warn!(size = config.rcvbuf, error = %e, "failed to set SO_RCVBUF");
        }
    }
    if config.keepalive.enabled {
        let ka = TcpKeepalive::new().with_time(config.keepalive.time);
        #[cfg(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "freebsd",
            target_os = "windows"
        ))]
        let ka = ka.with_interval(config.keepalive.interval);
        #[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
        let ka = ka.with_retries(config.keepalive.probes);
        if let Err(e) = sock.set_tcp_keepalive(&ka) {
            warn!(error = %e, "failed to set TCP keepalive");
        }
    }
}

/// Unconnected socket for `addr` with options applied.
pub(crate) fn connect_socket(addr: &SocketAddr, config: &TcpConfig) -> io::Result<TcpSocket> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    set_options(SockRef::from(&socket), config);
    Ok(socket)
}

/// Direct system-call I/O on a registered stream.
///
/// Used for the handshake exchange, which runs inside one reactor step and
/// cannot wait for the runtime to refresh readiness.
pub(crate) struct RawSocket<'a>(SockRef<'a>);

impl<'a> RawSocket<'a> {
    pub(crate) fn new(stream: &'a TcpStream) -> Self {
        Self(SockRef::from(stream))
    }
}

impl ByteStream for RawSocket<'_> {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.0).read(buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeepaliveConfig;
    use oob_core::ProcessName;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn config() -> TcpConfig {
        TcpConfig::new(ProcessName::new("job", 0).unwrap())
            .with_buffers(64 * 1024, 64 * 1024)
            .with_keepalive(KeepaliveConfig {
                enabled: true,
                time: Duration::from_secs(60),
                interval: Duration::from_secs(5),
                probes: 3,
            })
    }

    #[tokio::test]
    async fn test_connect_socket_options() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let socket = connect_socket(&addr, &config()).unwrap();
        let (stream, _) = tokio::join!(socket.connect(addr), listener.accept());
        let stream = stream.unwrap();

        let sock = SockRef::from(&stream);
        assert!(sock.nodelay().unwrap());
        assert!(sock.keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_raw_socket_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let raw = RawSocket::new(&client);
        assert_eq!(raw.try_write(b"ping").unwrap(), 4);

        server.readable().await.unwrap();
        let mut buf = [0u8; 8];
        let n = ByteStream::try_read(&server, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        let raw_server = RawSocket::new(&server);
        let err = raw_server.try_read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}

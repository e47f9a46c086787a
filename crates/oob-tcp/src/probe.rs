//! Liveness probe against a remote listener

use crate::error::{HandshakeRejection, TcpError, TcpResult};
use oob_core::{MessageClass, MessageHeader, ProcessName, HEADER_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Ask the process listening on `addr` who it is.
///
/// Sends a `Probe` header and returns the origin of the echoed header. The
/// remote closes the connection after answering and does not record us as a peer.
pub async fn probe(local: &ProcessName, addr: SocketAddr, timeout: Duration) -> TcpResult<ProcessName> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let hdr = MessageHeader::new(
            local.clone(),
            ProcessName::unknown(),
            MessageClass::Probe,
            0,
            0,
            0,
        );
        stream.write_all(&hdr.to_network()).await?;

        let mut buf = [0u8; HEADER_SIZE];
        stream.read_exact(&mut buf).await?;
        let reply = MessageHeader::from_network(&buf)?;
        if reply.msg_class != MessageClass::Probe {
            return Err(HandshakeRejection::UnexpectedClass(format!("{:?}", reply.msg_class)).into());
        }
        Ok::<_, TcpError>(reply.origin)
    };

    let name = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TcpError::Timeout(format!("probe of {} timed out", addr)))??;
    debug!(%addr, remote = %name, "probe answered");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_reads_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let remote = ProcessName::new("job", 3).unwrap();
        let answer = remote.clone();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; HEADER_SIZE];
            sock.read_exact(&mut buf).await.unwrap();
            let hdr = MessageHeader::from_network(&buf).unwrap();
            assert_eq!(hdr.msg_class, MessageClass::Probe);
            let echo = MessageHeader::new(answer, hdr.origin, MessageClass::Probe, 0, 0, 0);
            sock.write_all(&echo.to_network()).await.unwrap();
        });

        let local = ProcessName::new("job", 0).unwrap();
        let name = probe(&local, addr, Duration::from_secs(2)).await.unwrap();
        assert_eq!(name, remote);
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept but never answer
        let _server = tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let local = ProcessName::new("job", 0).unwrap();
        let err = probe(&local, addr, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, TcpError::Timeout(_)));
    }
}

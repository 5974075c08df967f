//! UDP transport layer for ring peers
//!
//! Provides a thin wrapper around tokio's UdpSocket with:
//! - Configurable send/receive buffer sizes
//! - A fixed successor address (the only destination this peer writes to)
//! - Deadline-bounded receives so callers can observe shutdown promptly

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use baton_protocol::Message;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Receive buffer size; larger than any datagram the encoder will produce.
pub const RECV_BUFFER: usize = 65_536;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address to bind to
    pub bind: SocketAddr,
    /// Send buffer size in bytes
    pub sndbuf: usize,
    /// Receive buffer size in bytes
    pub rcvbuf: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            sndbuf: 256 * 1024,
            rcvbuf: 256 * 1024,
        }
    }
}

/// One peer's socket plus the address of its ring successor.
#[derive(Debug, Clone)]
pub struct RingTransport {
    socket: Arc<UdpSocket>,
    successor: SocketAddr,
}

impl RingTransport {
    /// Resolve a `host:port` string to the first matching socket address.
    pub async fn resolve(addr: &str) -> Result<SocketAddr> {
        let mut addrs =
            tokio::net::lookup_host(addr)
                .await
                .map_err(|e| Error::AddressResolution {
                    addr: addr.to_string(),
                    source: Some(e),
                })?;
        addrs.next().ok_or_else(|| Error::AddressResolution {
            addr: addr.to_string(),
            source: None,
        })
    }

    /// Bind to the configured address with the configured buffer sizes.
    pub async fn bind(cfg: TransportConfig, successor: SocketAddr) -> Result<Self> {
        let socket = Self::bind_socket(&cfg).map_err(|source| Error::Bind {
            addr: cfg.bind,
            source,
        })?;

        tracing::info!(
            "UDP transport bound to {} (successor={}, sndbuf={}, rcvbuf={})",
            cfg.bind,
            successor,
            cfg.sndbuf,
            cfg.rcvbuf
        );

        Ok(Self {
            socket: Arc::new(socket),
            successor,
        })
    }

    fn bind_socket(cfg: &TransportConfig) -> std::io::Result<UdpSocket> {
        let domain = if cfg.bind.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        // Set buffer sizes before binding
        socket.set_send_buffer_size(cfg.sndbuf)?;
        socket.set_recv_buffer_size(cfg.rcvbuf)?;

        socket.bind(&cfg.bind.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket)
    }

    /// Encode `msg` and write it to the successor. Returns bytes written.
    pub async fn send(&self, msg: &Message) -> Result<usize> {
        let bytes = msg.encode()?;
        self.send_raw(&bytes).await
    }

    /// Write raw bytes to the successor (no encoding).
    pub async fn send_raw(&self, data: &[u8]) -> Result<usize> {
        Ok(self.socket.send_to(data, self.successor).await?)
    }

    /// Wait at most `deadline` for one datagram and decode it.
    ///
    /// `Ok(None)` means the deadline passed with nothing to read.
    pub async fn recv_within(
        &self,
        buf: &mut [u8],
        deadline: Duration,
    ) -> Result<Option<(Message, SocketAddr)>> {
        match tokio::time::timeout(deadline, self.socket.recv_from(buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(Error::Io(e)),
            Ok(Ok((len, from))) => Ok(Some((Message::decode(&buf[..len])?, from))),
        }
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn successor(&self) -> SocketAddr {
        self.successor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_protocol::{MessageKind, BROADCAST};

    async fn loopback() -> RingTransport {
        let t = RingTransport::bind(TransportConfig::default(), SocketAddr::from(([127, 0, 0, 1], 9)))
            .await
            .unwrap();
        // Point the socket at itself.
        let addr = t.local_addr().unwrap();
        RingTransport {
            socket: t.socket,
            successor: addr,
        }
    }

    #[tokio::test]
    async fn test_transport_creation() {
        let t = loopback().await;
        let addr = t.local_addr().unwrap();
        assert!(addr.port() > 0);
        assert_eq!(t.successor(), addr);
    }

    #[tokio::test]
    async fn test_resolve() {
        let addr = tokio_test::assert_ok!(RingTransport::resolve("127.0.0.1:9000").await);
        assert_eq!(addr.port(), 9000);

        let err = tokio_test::assert_err!(RingTransport::resolve("not an address").await);
        assert!(matches!(err, Error::AddressResolution { .. }));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let t = loopback().await;
        let cfg = TransportConfig {
            bind: t.local_addr().unwrap(),
            ..Default::default()
        };
        let err = RingTransport::bind(cfg, t.successor()).await.unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[tokio::test]
    async fn test_send_recv_loopback() {
        let t = loopback().await;
        let msg = Message::heartbeat(0, 1);
        t.send(&msg).await.unwrap();

        let mut buf = vec![0u8; RECV_BUFFER];
        let (received, from) = t
            .recv_within(&mut buf, Duration::from_secs(2))
            .await
            .unwrap()
            .expect("datagram");
        assert_eq!(received, msg);
        assert_eq!(received.kind(), MessageKind::Heartbeat);
        assert_eq!(received.to, BROADCAST);
        assert_eq!(from, t.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_recv_deadline() {
        let t = loopback().await;
        let mut buf = vec![0u8; RECV_BUFFER];
        let got = t
            .recv_within(&mut buf, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_garbage_is_protocol_error() {
        let t = loopback().await;
        t.send_raw(b"{garbage").await.unwrap();
        let mut buf = vec![0u8; RECV_BUFFER];
        let err = t
            .recv_within(&mut buf, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}

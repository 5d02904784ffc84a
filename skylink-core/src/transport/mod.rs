//! Socket transports the supervisor drives.
//!
//! Both flavours run their socket I/O in spawned tasks and deliver inbound
//! traffic as [`TransportEvent`]s on an mpsc channel handed out at
//! construction. Outbound sends are fire-and-forget: no queuing beyond the
//! socket, no backpressure reported to the caller.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::TransportMode;

pub mod datagram;
pub mod stream;

pub use datagram::DatagramTransport;
pub use stream::StreamTransport;

/// Capacity of the transport → supervisor event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── TransportEvent ───────────────────────────────────────────────

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw bytes arrived. `from` is the sender for datagram transports.
    Data {
        bytes: Bytes,
        from: Option<SocketAddr>,
    },
    /// A stream connection was established.
    Connected(SocketAddr),
    /// A stream connection was lost or torn down.
    Disconnected,
}

// ── PeerEndpoint ─────────────────────────────────────────────────

/// Where outbound traffic goes.
///
/// In datagram mode the address is configured but the port is replaced by
/// the sender port of every inbound datagram. In stream mode both are
/// configured and used to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub address: IpAddr,
    pub port: u16,
    /// Whether `port` was learned from traffic rather than configured.
    pub learned: bool,
}

impl PeerEndpoint {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            learned: false,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Adopt the sender port of an inbound datagram.
    pub fn learn_port(&mut self, port: u16) {
        self.port = port;
        self.learned = true;
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

// ── Transport ────────────────────────────────────────────────────

/// The capability the supervisor drives but does not implement.
#[async_trait]
pub trait Transport: Send {
    fn mode(&self) -> TransportMode;

    /// Locally bound address, when the transport has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Write one buffer towards `peer`. Stream transports ignore `peer`
    /// and drop the buffer unless currently connected.
    async fn send(&mut self, bytes: Bytes, peer: SocketAddr);

    /// Tear down any live connection and connect to `peer` afresh.
    /// A no-op for connectionless transports.
    async fn reconnect(&mut self, peer: SocketAddr);

    /// Stop background tasks and release the socket.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn learned_port_replaces_configured() {
        let mut peer = PeerEndpoint::new(IpAddr::V4(Ipv4Addr::new(192, 168, 2, 1)), 14550);
        assert!(!peer.learned);
        peer.learn_port(40123);
        assert!(peer.learned);
        assert_eq!(peer.to_string(), "192.168.2.1:40123");
    }
}

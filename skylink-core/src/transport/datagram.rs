//! Connectionless UDP transport.
//!
//! Binds `0.0.0.0:<local_port>` and forwards every received datagram,
//! tagged with its sender, to the supervisor. There is no connection to
//! lose: link health is judged entirely from heartbeats.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::codec::MAX_FRAME_LEN;
use crate::config::TransportMode;
use crate::error::LinkError;
use crate::transport::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};

/// Receive buffer; a datagram may carry several frames back to back.
const RECV_BUFFER_LEN: usize = 8 * MAX_FRAME_LEN;

pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    reader: JoinHandle<()>,
}

impl DatagramTransport {
    /// Bind on all interfaces and start the receive task.
    pub async fn bind(
        local_port: u16,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), LinkError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port));
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket)
    }

    /// Wrap an already-bound socket.
    pub fn from_socket(
        socket: UdpSocket,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), LinkError> {
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader = tokio::spawn(receive_loop(Arc::clone(&socket), tx));
        debug!(%local_addr, "datagram transport bound");

        Ok((
            Self {
                socket,
                local_addr,
                reader,
            },
            rx,
        ))
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, events: mpsc::Sender<TransportEvent>) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                let event = TransportEvent::Data {
                    bytes: Bytes::copy_from_slice(&buf[..len]),
                    from: Some(from),
                };
                if events.send(event).await.is_err() {
                    // Supervisor is gone.
                    break;
                }
            }
            // ICMP port-unreachable surfaces here on some platforms; the
            // socket itself is still usable.
            Err(e) => warn!("datagram receive error: {e}"),
        }
    }
}

#[async_trait]
impl Transport for DatagramTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Datagram
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    async fn send(&mut self, bytes: Bytes, peer: SocketAddr) {
        match self.socket.send_to(&bytes, peer).await {
            Ok(_) => trace!(%peer, len = bytes.len(), "datagram sent"),
            Err(e) => debug!(%peer, "datagram send failed: {e}"),
        }
    }

    async fn reconnect(&mut self, _peer: SocketAddr) {}

    async fn close(&mut self) {
        self.reader.abort();
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ── Tests ────────────────────────────────────────────────────────

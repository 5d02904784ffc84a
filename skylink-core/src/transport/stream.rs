//! Connection-oriented TCP transport.
//!
//! A background worker owns the socket. A fixed-period reconnect timer
//! keeps it pointed at the configured peer: a connection to any other peer
//! is dropped, and a new attempt starts only when fully unconnected with no
//! attempt already in flight. There is no backoff.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::codec::MAX_FRAME_LEN;
use crate::config::TransportMode;
use crate::transport::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};

const READ_BUFFER_LEN: usize = 8 * MAX_FRAME_LEN;
const COMMAND_CHANNEL_CAPACITY: usize = 256;

type ConnectFuture = BoxFuture<'static, (SocketAddr, io::Result<TcpStream>)>;

#[derive(Debug)]
enum StreamCommand {
    Write(Bytes),
    Reconnect(SocketAddr),
}

// ── StreamTransport ──────────────────────────────────────────────

/// Handle to the TCP worker task.
pub struct StreamTransport {
    commands: mpsc::Sender<StreamCommand>,
    connected: watch::Receiver<Option<SocketAddr>>,
    worker: JoinHandle<()>,
}

impl StreamTransport {
    /// Start the worker. The first connect attempt is issued immediately.
    pub fn spawn(
        target: SocketAddr,
        reconnect_interval: Duration,
        connect_timeout: Duration,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(None);

        let worker = StreamWorker {
            target,
            reconnect_interval,
            connect_timeout,
            connecting: None,
            reader: None,
            writer: None,
            peer: None,
            events: event_tx,
            commands: command_rx,
            connected: connected_tx,
        };

        let transport = Self {
            commands: command_tx,
            connected: connected_rx,
            worker: tokio::spawn(worker.run()),
        };
        (transport, event_rx)
    }

    /// Peer of the live connection, if any.
    pub fn peer(&self) -> Option<SocketAddr> {
        *self.connected.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.peer().is_some()
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Stream
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn send(&mut self, bytes: Bytes, _peer: SocketAddr) {
        if !self.is_connected() {
            trace!(len = bytes.len(), "stream not connected; dropping send");
            return;
        }
        if let Err(e) = self.commands.try_send(StreamCommand::Write(bytes)) {
            debug!("stream send dropped: {e}");
        }
    }

    async fn reconnect(&mut self, peer: SocketAddr) {
        if self.commands.send(StreamCommand::Reconnect(peer)).await.is_err() {
            warn!("stream worker is gone; cannot reconnect");
        }
    }

    async fn close(&mut self) {
        self.worker.abort();
        let _ = (&mut self.worker).await;
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

// ── StreamWorker ─────────────────────────────────────────────────

struct StreamWorker {
    target: SocketAddr,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    /// At most one attempt in flight.
    connecting: Option<ConnectFuture>,
    reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    peer: Option<SocketAddr>,
    events: mpsc::Sender<TransportEvent>,
    commands: mpsc::Receiver<StreamCommand>,
    connected: watch::Sender<Option<SocketAddr>>,
}

impl StreamWorker {
    async fn run(mut self) {
        let mut timer = tokio::time::interval(self.reconnect_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = BytesMut::with_capacity(READ_BUFFER_LEN);

        loop {
            tokio::select! {
                _ = timer.tick() => self.reconnect_tick().await,
                command = self.commands.recv() => match command {
                    Some(StreamCommand::Write(bytes)) => self.write(bytes).await,
                    Some(StreamCommand::Reconnect(target)) => self.retarget(target).await,
                    None => break,
                },
                (target, result) = finish_connect(&mut self.connecting) => {
                    self.on_connect(target, result).await;
                }
                result = read_some(&mut self.reader, &mut buf) => match result {
                    Ok(0) => self.on_closed("peer closed the connection").await,
                    Ok(_) => {
                        let event = TransportEvent::Data {
                            bytes: buf.split().freeze(),
                            from: None,
                        };
                        if self.events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stream read failed: {e}");
                        self.on_closed("read failed").await;
                    }
                },
            }
        }

        self.disconnect("transport closed").await;
    }

    async fn reconnect_tick(&mut self) {
        if self.peer.is_some_and(|peer| peer != self.target) {
            self.disconnect("connected to stale peer").await;
        }
        if self.peer.is_none() && self.connecting.is_none() {
            self.begin_connect();
        }
    }

    /// Tear down whatever is live and connect to `target` right away.
    async fn retarget(&mut self, target: SocketAddr) {
        info!(%target, "stream reconnect requested");
        self.target = target;
        self.connecting = None;
        self.disconnect("reconnect requested").await;
        self.begin_connect();
    }

    fn begin_connect(&mut self) {
        let target = self.target;
        let timeout = self.connect_timeout;
        debug!(%target, "stream connecting");

        self.connecting = Some(
            async move {
                let result = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
                };
                (target, result)
            }
            .boxed(),
        );
    }

    async fn on_connect(&mut self, target: SocketAddr, result: io::Result<TcpStream>) {
        match result {
            Ok(stream) if target == self.target => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed: {e}");
                }
                let (reader, writer) = stream.into_split();
                self.reader = Some(reader);
                self.writer = Some(writer);
                self.peer = Some(target);
                self.connected.send_replace(Some(target));
                info!(%target, "stream connected");
                let _ = self.events.send(TransportEvent::Connected(target)).await;
            }
            Ok(_) => debug!(%target, "dropping connection to superseded target"),
            Err(e) => debug!(%target, "stream connect failed: {e}"),
        }
    }

    /// The connection died underneath us: report it and try once more
    /// straight away. Further attempts wait for the timer.
    async fn on_closed(&mut self, reason: &str) {
        self.disconnect(reason).await;
        if self.connecting.is_none() {
            self.begin_connect();
        }
    }

    async fn disconnect(&mut self, reason: &str) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(peer) = self.peer.take() {
            info!(%peer, reason, "stream disconnected");
            self.connected.send_replace(None);
            let _ = self.events.send(TransportEvent::Disconnected).await;
        }
    }

    async fn write(&mut self, bytes: Bytes) {
        let Some(writer) = self.writer.as_mut() else {
            trace!(len = bytes.len(), "stream not connected; dropping write");
            return;
        };
        if let Err(e) = writer.write_all(&bytes).await {
            warn!("stream write failed: {e}");
            self.on_closed("write failed").await;
        }
    }
}

/// Resolve the in-flight connect attempt, or pend forever if there is none.
async fn finish_connect(
    connecting: &mut Option<ConnectFuture>,
) -> (SocketAddr, io::Result<TcpStream>) {
    match connecting.as_mut() {
        Some(attempt) => {
            let outcome = attempt.await;
            *connecting = None;
            outcome
        }
        None => std::future::pending().await,
    }
}

/// Read from the live connection, or pend forever if there is none.
async fn read_some(reader: &mut Option<OwnedReadHalf>, buf: &mut BytesMut) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read_buf(buf).await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn connects_and_forwards_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (transport, mut events) =
            StreamTransport::spawn(addr, Duration::from_millis(100), Duration::from_secs(1));

        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected(addr));
        assert_eq!(transport.peer(), Some(addr));

        server.write_all(b"abc").await.unwrap();
        match next_event(&mut events).await {
            TransportEvent::Data { bytes, from } => {
                assert_eq!(&bytes[..], b"abc");
                assert_eq!(from, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn writes_only_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (mut transport, mut events) =
            StreamTransport::spawn(addr, Duration::from_millis(100), Duration::from_secs(1));

        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected(addr));

        transport.send(Bytes::from_static(b"xyz"), addr).await;
        let mut buf = [0u8; 3];
        tokio::time::timeout(WAIT, server.read_exact(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(&buf, b"xyz");
    }

    #[tokio::test]
    async fn send_without_connection_is_dropped() {
        // Nothing listens on this port; the attempt fails quietly.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut transport, _events) =
            StreamTransport::spawn(addr, Duration::from_millis(100), Duration::from_secs(1));
        transport.send(Bytes::from_static(b"lost"), addr).await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn reconnects_after_peer_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_transport, mut events) =
            StreamTransport::spawn(addr, Duration::from_millis(100), Duration::from_secs(1));

        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected(addr));
        drop(server);

        assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
        let _again = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected(addr));
    }

    #[tokio::test]
    async fn close_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (mut transport, mut events) =
            StreamTransport::spawn(addr, Duration::from_millis(100), Duration::from_secs(1));

        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected(addr));

        transport.close().await;
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(WAIT, server.read(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(n, 0);
    }
}

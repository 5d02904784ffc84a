//! The link supervisor actor.
//!
//! One task owns the [`LinkMachine`], the transport, and the codec. It
//! multiplexes three inputs with `tokio::select!`:
//!
//! - the periodic tick, which advances the state machine,
//! - transport events (inbound bytes, stream connect/disconnect),
//! - commands from [`SupervisorHandle`].
//!
//! Observers get a [`LinkEvent`] broadcast and a [`LinkStatus`] watch.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use mavlink::common::MavMessage;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, trace, warn};

use crate::codec::{MAX_FRAME_LEN, MavlinkCodec};
use crate::config::{LinkConfig, TransportMode};
use crate::error::LinkError;
use crate::event::{EVENT_BROADCAST_CAPACITY, LinkEvent, LinkStatus};
use crate::message::{ParameterMap, request_parameter_list};
use crate::state::{Effect, LinkMachine};
use crate::transport::{
    DatagramTransport, PeerEndpoint, StreamTransport, Transport, TransportEvent,
};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum Command {
    SetGroundAddress(IpAddr),
    SetTarget { system: u8, component: u8 },
    Send(MavMessage),
    SetSaving(bool),
    Shutdown,
}

// ── Supervisor ───────────────────────────────────────────────────

/// A link supervisor that has its transport but is not yet running.
///
/// Subscribe before [`spawn`](Self::spawn) to observe `SetupComplete`.
pub struct Supervisor {
    machine: LinkMachine,
    transport: Box<dyn Transport>,
    transport_events: mpsc::Receiver<TransportEvent>,
    codec: MavlinkCodec,
    rx_buf: BytesMut,
    peer: PeerEndpoint,
    target_system: u8,
    target_component: u8,
    tick_interval: Duration,
    events: broadcast::Sender<LinkEvent>,
    status: watch::Sender<LinkStatus>,
    /// Parameter store must be re-snapshotted: set on state changes and
    /// completed syncs, not per `PARAM_VALUE`.
    params_dirty: bool,
}

impl Supervisor {
    /// Validate `config`, bring up its transport, and start supervising.
    pub async fn start(config: LinkConfig) -> Result<SupervisorHandle, LinkError> {
        Ok(Self::bind(config).await?.spawn())
    }

    /// Bring up the transport for `config.mode` without starting the actor.
    pub async fn bind(config: LinkConfig) -> Result<Self, LinkError> {
        config.validate()?;
        let (transport, events) = match config.mode {
            TransportMode::Datagram => {
                let (transport, events) = DatagramTransport::bind(config.local_port).await?;
                (Box::new(transport) as Box<dyn Transport>, events)
            }
            TransportMode::Stream => {
                let (transport, events) = StreamTransport::spawn(
                    config.ground_addr(),
                    config.reconnect_interval(),
                    config.connect_timeout(),
                );
                (Box::new(transport) as Box<dyn Transport>, events)
            }
        };
        Self::with_transport(config, transport, events)
    }

    /// Supervise an existing transport. Its mode overrides `config.mode`.
    pub fn with_transport(
        mut config: LinkConfig,
        transport: Box<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
    ) -> Result<Self, LinkError> {
        config.mode = transport.mode();
        config.validate()?;

        let peer = PeerEndpoint::new(config.ground_address, config.ground_port());
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (status, _) = watch::channel(LinkStatus::new(peer));

        Ok(Self {
            machine: LinkMachine::new(config.timing(), Instant::now()),
            transport,
            transport_events,
            codec: MavlinkCodec::new(config.system_id, config.component_id),
            rx_buf: BytesMut::with_capacity(4 * MAX_FRAME_LEN),
            peer,
            target_system: config.target_system,
            target_component: config.target_component,
            tick_interval: config.tick_interval(),
            events,
            status,
            params_dirty: false,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Announce setup and hand the supervisor to its own task.
    pub fn spawn(self) -> SupervisorHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let mode = self.transport.mode();
        let local_addr = self.transport.local_addr();

        info!(%mode, peer = %self.peer, ?local_addr, "link supervisor started");
        let _ = self.events.send(LinkEvent::SetupComplete { mode, local_addr });

        SupervisorHandle {
            commands: command_tx,
            events: self.events.clone(),
            status: self.status.subscribe(),
            local_addr,
            actor: tokio::spawn(self.run(command_rx)),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(Instant::now()).await,
                event = self.transport_events.recv(), if transport_open => match event {
                    Some(event) => self.on_transport_event(event),
                    None => {
                        warn!("transport event channel closed");
                        transport_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
            self.publish_status();
        }

        self.transport.close().await;
        info!("link supervisor stopped");
    }

    // ── Inputs ───────────────────────────────────────────────────

    async fn on_tick(&mut self, now: Instant) {
        for effect in self.machine.tick(now) {
            self.apply(effect).await;
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data { bytes, from } => {
                self.rx_buf.extend_from_slice(&bytes);
                self.drain_frames(from, Instant::now());
            }
            TransportEvent::Connected(addr) => {
                debug!(%addr, "transport connected");
                self.rx_buf.clear();
                self.machine.mark_link_available();
            }
            TransportEvent::Disconnected => {
                debug!("transport disconnected");
                self.rx_buf.clear();
            }
        }
    }

    /// Decode everything buffered. Only a valid frame from a datagram
    /// sender marks the link available and teaches us its port.
    fn drain_frames(&mut self, from: Option<SocketAddr>, now: Instant) {
        loop {
            match self.codec.decode(&mut self.rx_buf) {
                Ok(Some(frame)) => {
                    if let Some(from) = from {
                        self.learn_peer(from);
                    }
                    self.machine.on_message(&frame.classify(), now);
                    let _ = self.events.send(LinkEvent::Message(Arc::new(frame)));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("decode failed: {e}");
                    self.rx_buf.clear();
                    break;
                }
            }
        }
    }

    fn learn_peer(&mut self, from: SocketAddr) {
        if !self.peer.learned || self.peer.port != from.port() {
            debug!(%from, "learned ground port");
        }
        self.peer.learn_port(from.port());
        self.machine.mark_link_available();
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::SetGroundAddress(address) => {
                if self.peer.address == address {
                    return;
                }
                self.peer.address = address;
                info!(peer = %self.peer, "ground address changed");
                if self.transport.mode() == TransportMode::Stream {
                    self.transport.reconnect(self.peer.socket_addr()).await;
                }
            }
            Command::SetTarget { system, component } => {
                debug!(system, component, "target changed");
                self.target_system = system;
                self.target_component = component;
            }
            Command::Send(message) => self.send_message(message).await,
            Command::SetSaving(saving) => {
                if let Some(effect) = self.machine.set_saving(saving) {
                    self.apply(effect).await;
                }
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    // ── Outputs ──────────────────────────────────────────────────

    async fn apply(&mut self, effect: Effect) {
        let event = match effect {
            Effect::StateChanged { from, to } => {
                info!(%from, %to, "link state changed");
                self.params_dirty = true;
                LinkEvent::StateChanged { from, to }
            }
            Effect::LoadingChanged(loading) => LinkEvent::LoadingChanged(loading),
            Effect::SavingChanged(saving) => LinkEvent::SavingChanged(saving),
            Effect::HeartbeatAge(age) => {
                trace!(?age, "heartbeat age");
                LinkEvent::HeartbeatAge(age)
            }
            Effect::RequestParameters => {
                info!(peer = %self.peer, "requesting parameter list");
                let request = request_parameter_list(self.target_system, self.target_component);
                self.send_message(request).await;
                return;
            }
            Effect::LinkLost(reason) => {
                warn!(%reason, "link lost");
                if self.transport.mode() == TransportMode::Stream {
                    self.transport.reconnect(self.peer.socket_addr()).await;
                }
                LinkEvent::LinkLost(reason)
            }
            Effect::ParametersReady(params) => {
                info!(count = params.len(), "parameters synchronized");
                self.params_dirty = true;
                LinkEvent::ParametersChanged(params)
            }
        };
        let _ = self.events.send(event);
    }

    async fn send_message(&mut self, message: MavMessage) {
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);
        if let Err(e) = self.codec.encode(message, &mut buf) {
            warn!("dropping outbound message: {e}");
            return;
        }
        self.transport.send(buf.freeze(), self.peer.socket_addr()).await;
    }

    fn publish_status(&mut self) {
        let refresh_params = std::mem::take(&mut self.params_dirty);
        let machine = &self.machine;
        let peer = self.peer;
        let codec = self.codec.stats();

        self.status.send_if_modified(|status| {
            let before = (
                status.state,
                status.loading,
                status.saving,
                status.heartbeat_age,
                status.link_available,
                status.peer,
                status.codec,
            );
            status.state = machine.state();
            status.loading = machine.loading();
            status.saving = machine.saving();
            status.heartbeat_age = machine.heartbeat_age();
            status.link_available = machine.is_link_available();
            status.peer = peer;
            status.codec = codec;
            if refresh_params {
                status.parameters = Arc::new(machine.parameters().clone());
            }
            let after = (
                status.state,
                status.loading,
                status.saving,
                status.heartbeat_age,
                status.link_available,
                status.peer,
                status.codec,
            );
            refresh_params || before != after
        });
    }
}

// ── SupervisorHandle ─────────────────────────────────────────────

/// Control surface for a running supervisor.
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<LinkEvent>,
    status: watch::Receiver<LinkStatus>,
    local_addr: Option<SocketAddr>,
    actor: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Copy of the latest status.
    pub fn snapshot(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// The parameter store as of the last completed sync or state change.
    /// Empty while disconnected.
    pub fn parameters(&self) -> Arc<ParameterMap> {
        Arc::clone(&self.status.borrow().parameters)
    }

    /// Locally bound address (datagram mode).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Point the link at a new ground address. Stream mode reconnects at
    /// once; datagram mode only retargets subsequent sends.
    pub async fn set_ground_address(&self, address: IpAddr) -> Result<(), LinkError> {
        Ok(self.commands.send(Command::SetGroundAddress(address)).await?)
    }

    /// System and component addressed by outbound requests.
    pub async fn set_target(&self, system: u8, component: u8) -> Result<(), LinkError> {
        Ok(self
            .commands
            .send(Command::SetTarget { system, component })
            .await?)
    }

    /// Fire-and-forget outbound message.
    pub async fn send(&self, message: MavMessage) -> Result<(), LinkError> {
        Ok(self.commands.send(Command::Send(message)).await?)
    }

    /// Mark a parameter write as in flight (or finished).
    pub async fn set_saving(&self, saving: bool) -> Result<(), LinkError> {
        Ok(self.commands.send(Command::SetSaving(saving)).await?)
    }

    /// Stop ticking, close the transport, and wait for the actor to exit.
    pub async fn shutdown(self) -> Result<(), LinkError> {
        // A closed channel means the actor already exited.
        let _ = self.commands.send(Command::Shutdown).await;
        self.actor
            .await
            .map_err(|e| LinkError::Other(format!("supervisor task failed: {e}")))
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! What the supervisor publishes to observers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::CodecStats;
use crate::config::TransportMode;
use crate::message::{MavFrame, ParameterMap};
use crate::state::{LinkState, LossReason};
use crate::transport::PeerEndpoint;

/// Capacity of the observer broadcast channel. Slow subscribers lag and
/// miss events rather than stall the supervisor.
pub const EVENT_BROADCAST_CAPACITY: usize = 1024;

// ── LinkEvent ────────────────────────────────────────────────────

/// Notification delivered to every subscriber.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Emitted once, after the transport came up.
    SetupComplete {
        mode: TransportMode,
        local_addr: Option<SocketAddr>,
    },
    StateChanged {
        from: LinkState,
        to: LinkState,
    },
    LoadingChanged(bool),
    SavingChanged(bool),
    /// Recomputed every tick; `None` until the first heartbeat.
    HeartbeatAge(Option<Duration>),
    /// A full parameter sync finished.
    ParametersChanged(Arc<ParameterMap>),
    LinkLost(LossReason),
    /// Every decoded inbound frame, after the supervisor has seen it.
    Message(Arc<MavFrame>),
}

// ── LinkStatus ───────────────────────────────────────────────────

/// Read-only snapshot of the supervisor, refreshed after every change.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub state: LinkState,
    pub loading: bool,
    pub saving: bool,
    pub heartbeat_age: Option<Duration>,
    pub link_available: bool,
    pub peer: PeerEndpoint,
    pub parameters: Arc<ParameterMap>,
    pub codec: CodecStats,
}

impl LinkStatus {
    pub fn new(peer: PeerEndpoint) -> Self {
        Self {
            state: LinkState::Disconnected,
            loading: false,
            saving: false,
            heartbeat_age: None,
            link_available: false,
            peer,
            parameters: Arc::new(ParameterMap::new()),
            codec: CodecStats::default(),
        }
    }
}

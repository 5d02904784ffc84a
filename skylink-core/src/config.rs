//! Link configuration.
//!
//! Every timing threshold is a plain millisecond field so the whole struct
//! round-trips through TOML. Accessors hand back `Duration`s.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// MAVLink component id conventionally used by ground control software.
pub const MAV_COMP_ID_MISSIONPLANNER: u8 = 190;

// ── TransportMode ────────────────────────────────────────────────

/// Which socket flavour carries the link. Fixed for the supervisor's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Connectionless; the peer port is learned from inbound traffic.
    #[default]
    #[serde(alias = "udp")]
    Datagram,
    /// Connection-oriented; the supervisor actively (re)connects.
    #[serde(alias = "tcp")]
    Stream,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Datagram => write!(f, "datagram"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "datagram" | "udp" => Ok(Self::Datagram),
            "stream" | "tcp" => Ok(Self::Stream),
            other => Err(LinkError::Config(format!("unknown transport mode `{other}`"))),
        }
    }
}

// ── Timing ───────────────────────────────────────────────────────

/// Thresholds consumed by the link state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Time spent in `Connected` before parameter sync starts.
    pub settle_window: Duration,
    /// Heartbeat age at which the link is considered lost.
    pub heartbeat_loss: Duration,
    /// Maximum gap between parameter values during sync.
    pub parameter_stall: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        LinkConfig::default().timing()
    }
}

// ── LinkConfig ───────────────────────────────────────────────────

/// Configuration handed to the supervisor at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Transport flavour.
    pub mode: TransportMode,
    /// Local UDP port to bind in datagram mode (0 = ephemeral).
    pub local_port: u16,
    /// Address of the ground-side peer.
    pub ground_address: IpAddr,
    /// Initial peer port for datagram sends; replaced once learned.
    pub ground_udp_port: u16,
    /// Peer port for stream connects.
    pub ground_tcp_port: u16,
    /// Our MAVLink system id.
    pub system_id: u8,
    /// Our MAVLink component id.
    pub component_id: u8,
    /// System addressed by outbound requests.
    pub target_system: u8,
    /// Component addressed by outbound requests.
    pub target_component: u8,
    /// Supervisor tick period.
    pub tick_interval_ms: u64,
    /// Settle time in `Connected` before requesting parameters.
    pub settle_window_ms: u64,
    /// Heartbeat age that counts as link loss.
    pub heartbeat_loss_ms: u64,
    /// Parameter sync stall window.
    pub parameter_stall_ms: u64,
    /// Stream reconnect timer period.
    pub reconnect_interval_ms: u64,
    /// Upper bound on a single stream connect attempt.
    pub connect_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Datagram,
            local_port: 14550,
            ground_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ground_udp_port: 14550,
            ground_tcp_port: 5760,
            system_id: 255,
            component_id: MAV_COMP_ID_MISSIONPLANNER,
            target_system: 1,
            target_component: 1,
            tick_interval_ms: 200,
            settle_window_ms: 5000,
            heartbeat_loss_ms: 5000,
            parameter_stall_ms: 7000,
            reconnect_interval_ms: 1000,
            connect_timeout_ms: 3000,
        }
    }
}

impl LinkConfig {
    /// Reject values the supervisor cannot run with.
    pub fn validate(&self) -> Result<(), LinkError> {
        let durations = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("settle_window_ms", self.settle_window_ms),
            ("heartbeat_loss_ms", self.heartbeat_loss_ms),
            ("parameter_stall_ms", self.parameter_stall_ms),
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(LinkError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.mode == TransportMode::Stream && self.ground_tcp_port == 0 {
            return Err(LinkError::Config(
                "ground_tcp_port must be set in stream mode".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The thresholds the state machine evaluates on each tick.
    pub fn timing(&self) -> Timing {
        Timing {
            settle_window: Duration::from_millis(self.settle_window_ms),
            heartbeat_loss: Duration::from_millis(self.heartbeat_loss_ms),
            parameter_stall: Duration::from_millis(self.parameter_stall_ms),
        }
    }

    /// Peer port for the configured transport mode.
    pub fn ground_port(&self) -> u16 {
        match self.mode {
            TransportMode::Datagram => self.ground_udp_port,
            TransportMode::Stream => self.ground_tcp_port,
        }
    }

    /// Full peer socket address for the configured transport mode.
    pub fn ground_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ground_address, self.ground_port())
    }
}

// ── Tests ────────────────────────────────────────────────────────

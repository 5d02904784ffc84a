//! # skylink-core
//!
//! Ground-side supervisor for a MAVLink telemetry link.
//!
//! This crate contains:
//! - **Config**: `LinkConfig`, `TransportMode`, `Timing`
//! - **Codec**: `MavlinkCodec`, noise-tolerant MAVLink v1/v2 framing for `tokio_util`
//! - **Transport**: `DatagramTransport` (UDP) and `StreamTransport` (TCP with reconnect timer)
//! - **State**: `LinkMachine`, the I/O-free link lifecycle with heartbeat and parameter tracking
//! - **Supervisor**: the actor that drives it all, and its `SupervisorHandle`
//! - **Error**: `LinkError`, a `thiserror`-based error type

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod state;
pub mod supervisor;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{CodecStats, MAX_FRAME_LEN, MavlinkCodec};
pub use config::{LinkConfig, Timing, TransportMode};
pub use error::LinkError;
pub use event::{LinkEvent, LinkStatus};
pub use message::{Inbound, MavFrame, ParamValue, ParameterMap};
pub use state::{Effect, HeartbeatTracker, LinkMachine, LinkState, LossReason, ParameterSync};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use transport::{DatagramTransport, PeerEndpoint, StreamTransport, Transport, TransportEvent};

/// The MAVLink dialect messages travel in.
pub use mavlink::common::MavMessage;

//! Decoded frames and the two message categories the supervisor acts on.
//!
//! Everything else in the MAVLink dialect passes through untouched as
//! [`Inbound::Other`] and is forwarded to observers.

use std::collections::BTreeMap;

use mavlink::common::{MavMessage, PARAM_REQUEST_LIST_DATA};
use mavlink::{MavHeader, MavlinkVersion};

/// Length of the fixed-size `param_id` field.
pub const PARAM_ID_LEN: usize = 16;

/// Parameter name → value, as synchronized from the vehicle.
pub type ParameterMap = BTreeMap<String, f32>;

// ── MavFrame ─────────────────────────────────────────────────────

/// One message produced by the codec.
#[derive(Debug, Clone)]
pub struct MavFrame {
    pub header: MavHeader,
    pub message: MavMessage,
    pub version: MavlinkVersion,
}

impl MavFrame {
    pub fn classify(&self) -> Inbound {
        Inbound::classify(&self.message)
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// Category of an inbound message, as far as link supervision cares.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Heartbeat,
    Parameter(ParamValue),
    Other,
}

impl Inbound {
    pub fn classify(message: &MavMessage) -> Self {
        match message {
            MavMessage::HEARTBEAT(_) => Inbound::Heartbeat,
            MavMessage::PARAM_VALUE(data) => Inbound::Parameter(ParamValue {
                name: param_name(&data.param_id),
                value: data.param_value,
                index: data.param_index,
                count: data.param_count,
            }),
            _ => Inbound::Other,
        }
    }
}

/// A single `PARAM_VALUE` report.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    pub name: String,
    pub value: f32,
    /// Position of this parameter in the vehicle's table.
    pub index: u16,
    /// Total number of parameters the vehicle holds.
    pub count: u16,
}

// ── Helpers ──────────────────────────────────────────────────────

/// Decode a NUL-padded `param_id` into a name.
pub fn param_name(raw: &[u8; PARAM_ID_LEN]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(PARAM_ID_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Encode a name into a NUL-padded `param_id`, truncating at 16 bytes.
pub fn param_id(name: &str) -> [u8; PARAM_ID_LEN] {
    let mut raw = [0u8; PARAM_ID_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(PARAM_ID_LEN);
    raw[..len].copy_from_slice(&bytes[..len]);
    raw
}

/// Build the "request all parameters" message.
pub fn request_parameter_list(target_system: u8, target_component: u8) -> MavMessage {
    MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
        target_system,
        target_component,
    })
}

// ── Tests ────────────────────────────────────────────────────────

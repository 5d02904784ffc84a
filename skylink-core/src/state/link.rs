//! Link lifecycle states.

/// The supervisor's view of the link.
///
/// ```text
///  Disconnected ──► Connected ──► SyncingParameters ──► Idle
///       ▲                                │               │
///       └────────────────────────────────┴───────────────┘
///                  liveness lost / parameter stall
/// ```
///
/// There is no terminal state; the cycle repeats for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// Nothing heard from the peer yet, or the link was torn down.
    #[default]
    Disconnected,
    /// Traffic seen; waiting out the settle window.
    Connected,
    /// Parameter list requested; accumulating `PARAM_VALUE`s.
    SyncingParameters,
    /// Parameters synchronized; watching liveness only.
    Idle,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
            Self::SyncingParameters => write!(f, "SyncingParameters"),
            Self::Idle => write!(f, "Idle"),
        }
    }
}

impl LinkState {
    /// States in which heartbeat liveness is enforced.
    pub fn checks_liveness(&self) -> bool {
        matches!(self, Self::SyncingParameters | Self::Idle)
    }
}

/// Why a live link was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossReason {
    /// No heartbeat ever, or the last one is older than the loss threshold.
    HeartbeatLost,
    /// Parameter sync made no progress within the stall window.
    ParameterStall,
}

impl std::fmt::Display for LossReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeartbeatLost => write!(f, "heartbeat lost"),
            Self::ParameterStall => write!(f, "parameter sync stalled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disconnected() {
        assert_eq!(LinkState::default(), LinkState::Disconnected);
    }

    #[test]
    fn liveness_only_after_connect() {
        assert!(!LinkState::Disconnected.checks_liveness());
        assert!(!LinkState::Connected.checks_liveness());
        assert!(LinkState::SyncingParameters.checks_liveness());
        assert!(LinkState::Idle.checks_liveness());
    }

    #[test]
    fn display_format() {
        assert_eq!(LinkState::SyncingParameters.to_string(), "SyncingParameters");
        assert_eq!(LossReason::ParameterStall.to_string(), "parameter sync stalled");
    }
}

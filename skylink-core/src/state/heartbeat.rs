//! Heartbeat age tracking.

use std::time::Duration;

use tokio::time::Instant;

/// Remembers when the last heartbeat arrived and the age computed at the
/// most recent tick. `None` means no heartbeat has ever been received.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatTracker {
    last_heartbeat_at: Option<Instant>,
    age: Option<Duration>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A heartbeat arrived; the age drops to zero.
    pub fn record(&mut self, now: Instant) {
        self.last_heartbeat_at = Some(now);
        self.age = Some(Duration::ZERO);
    }

    /// Recompute the age against `now` and return it.
    pub fn refresh(&mut self, now: Instant) -> Option<Duration> {
        self.age = self
            .last_heartbeat_at
            .map(|at| now.saturating_duration_since(at));
        self.age
    }

    /// Age as of the last [`refresh`](Self::refresh) or [`record`](Self::record).
    pub fn age(&self) -> Option<Duration> {
        self.age
    }

    /// `true` when no heartbeat was ever seen or the last one is at least
    /// `threshold` old.
    pub fn is_lost(&self, threshold: Duration) -> bool {
        self.age.is_none_or(|age| age >= threshold)
    }
}

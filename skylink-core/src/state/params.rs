//! Parameter synchronization progress.

use std::time::Duration;

use tokio::time::Instant;

use crate::message::{ParamValue, ParameterMap};

/// Count/index progress of the request-all-parameters handshake, plus the
/// parameter store it fills.
#[derive(Debug, Clone)]
pub struct ParameterSync {
    store: ParameterMap,
    total_count: u16,
    current_index: u16,
    last_received_at: Instant,
    initial_connect_at: Option<Instant>,
}

impl ParameterSync {
    pub fn new(now: Instant) -> Self {
        Self {
            store: ParameterMap::new(),
            total_count: 0,
            current_index: 0,
            last_received_at: now,
            initial_connect_at: None,
        }
    }

    /// Clear everything. `last_received_at` is set to `now` so a freshly
    /// started sync is not judged stalled straight away.
    pub fn reset(&mut self, now: Instant) {
        self.store.clear();
        self.total_count = 0;
        self.current_index = 0;
        self.initial_connect_at = None;
        self.last_received_at = now;
    }

    pub fn record(&mut self, param: &ParamValue, now: Instant) {
        self.store.insert(param.name.clone(), param.value);
        self.total_count = param.count;
        self.current_index = param.index;
        self.last_received_at = now;
    }

    pub fn is_complete(&self) -> bool {
        self.total_count != 0 && self.current_index == self.total_count - 1
    }

    /// `true` once more than `window` has passed without a parameter.
    pub fn is_stalled(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_received_at) > window
    }

    /// Time of the first tick spent in `Connected`, if any.
    pub fn initial_connect_at(&self) -> Option<Instant> {
        self.initial_connect_at
    }

    pub fn mark_connected(&mut self, now: Instant) {
        self.initial_connect_at = Some(now);
    }

    pub fn store(&self) -> &ParameterMap {
        &self.store
    }

    pub fn total_count(&self) -> u16 {
        self.total_count
    }

    pub fn current_index(&self) -> u16 {
        self.current_index
    }

    pub fn last_received_at(&self) -> Instant {
        self.last_received_at
    }
}

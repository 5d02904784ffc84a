//! The link lifecycle state machine.
//!
//! `LinkMachine` does no I/O. The supervisor feeds it inbound message
//! categories and periodic ticks, and performs the [`Effect`]s it returns.
//! All judgments are made from elapsed time and message arrival alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Timing;
use crate::message::{Inbound, ParamValue, ParameterMap};
use crate::state::heartbeat::HeartbeatTracker;
use crate::state::link::{LinkState, LossReason};
use crate::state::params::ParameterSync;

/// Something the owner of the machine must act on or publish.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StateChanged { from: LinkState, to: LinkState },
    LoadingChanged(bool),
    SavingChanged(bool),
    /// Heartbeat age recomputed at the start of a tick.
    HeartbeatAge(Option<Duration>),
    /// Send the "request all parameters" message.
    RequestParameters,
    /// The link was torn down; state is already `Disconnected`.
    LinkLost(LossReason),
    /// Sync completed; emitted once per sync cycle.
    ParametersReady(Arc<ParameterMap>),
}

/// Pure link supervisor state.
#[derive(Debug, Clone)]
pub struct LinkMachine {
    state: LinkState,
    link_available: bool,
    loading: bool,
    saving: bool,
    heartbeat: HeartbeatTracker,
    sync: ParameterSync,
    timing: Timing,
}

impl LinkMachine {
    pub fn new(timing: Timing, now: Instant) -> Self {
        Self {
            state: LinkState::Disconnected,
            link_available: false,
            loading: false,
            saving: false,
            heartbeat: HeartbeatTracker::new(),
            sync: ParameterSync::new(now),
            timing,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_link_available(&self) -> bool {
        self.link_available
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn saving(&self) -> bool {
        self.saving
    }

    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.heartbeat.age()
    }

    pub fn parameters(&self) -> &ParameterMap {
        self.sync.store()
    }

    pub fn sync(&self) -> &ParameterSync {
        &self.sync
    }

    // ── Inputs ───────────────────────────────────────────────────

    /// Inbound data arrived (datagram) or the stream connected.
    pub fn mark_link_available(&mut self) {
        self.link_available = true;
    }

    /// Feed one classified inbound message.
    pub fn on_message(&mut self, inbound: &Inbound, now: Instant) {
        match inbound {
            Inbound::Heartbeat => self.heartbeat.record(now),
            Inbound::Parameter(param) => self.on_parameter(param, now),
            Inbound::Other => {}
        }
    }

    /// Parameter values only count while a sync is in progress.
    fn on_parameter(&mut self, param: &ParamValue, now: Instant) {
        if self.state == LinkState::SyncingParameters {
            self.sync.record(param, now);
        }
    }

    /// A collaborator started or finished writing parameters.
    ///
    /// The tick overrides this in `Disconnected` and `SyncingParameters`.
    pub fn set_saving(&mut self, saving: bool) -> Option<Effect> {
        self.update_saving(saving)
    }

    /// Clear the parameter store and sync counters.
    ///
    /// Idempotent: a second call with the same `now` changes nothing.
    pub fn reset(&mut self, now: Instant) {
        self.sync.reset(now);
    }

    // ── Tick ─────────────────────────────────────────────────────

    /// Advance the machine by one supervisory tick.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        let age = self.heartbeat.refresh(now);
        effects.push(Effect::HeartbeatAge(age));
        let lost =
            self.state.checks_liveness() && self.heartbeat.is_lost(self.timing.heartbeat_loss);

        match self.state {
            LinkState::Disconnected => {
                self.push_loading(false, &mut effects);
                self.push_saving(false, &mut effects);
                if self.link_available {
                    self.transition(LinkState::Connected, &mut effects);
                }
            }
            LinkState::Connected => match self.sync.initial_connect_at() {
                None => self.sync.mark_connected(now),
                Some(entered) => {
                    if now.saturating_duration_since(entered) >= self.timing.settle_window {
                        self.transition(LinkState::SyncingParameters, &mut effects);
                        self.reset(now);
                        effects.push(Effect::RequestParameters);
                    }
                }
            },
            LinkState::SyncingParameters => {
                self.push_loading(true, &mut effects);
                self.push_saving(false, &mut effects);

                if lost {
                    self.lose(LossReason::HeartbeatLost, now, &mut effects);
                } else if self.sync.is_complete() {
                    let params = Arc::new(self.sync.store().clone());
                    effects.push(Effect::ParametersReady(params));
                    self.transition(LinkState::Idle, &mut effects);
                } else if self.sync.is_stalled(now, self.timing.parameter_stall) {
                    self.lose(LossReason::ParameterStall, now, &mut effects);
                }
            }
            LinkState::Idle => {
                self.push_loading(false, &mut effects);
                if lost {
                    self.lose(LossReason::HeartbeatLost, now, &mut effects);
                }
            }
        }

        effects
    }

    // ── Internals ────────────────────────────────────────────────

    /// Shared teardown for liveness loss and parameter stall.
    fn lose(&mut self, reason: LossReason, now: Instant, effects: &mut Vec<Effect>) {
        self.reset(now);
        self.link_available = false;
        self.transition(LinkState::Disconnected, effects);
        self.push_loading(false, effects);
        self.push_saving(false, effects);
        effects.push(Effect::LinkLost(reason));
    }

    fn transition(&mut self, to: LinkState, effects: &mut Vec<Effect>) {
        let from = self.state;
        if from != to {
            self.state = to;
            effects.push(Effect::StateChanged { from, to });
        }
    }

    fn push_loading(&mut self, loading: bool, effects: &mut Vec<Effect>) {
        if self.loading != loading {
            self.loading = loading;
            effects.push(Effect::LoadingChanged(loading));
        }
    }

    fn push_saving(&mut self, saving: bool, effects: &mut Vec<Effect>) {
        effects.extend(self.update_saving(saving));
    }

    fn update_saving(&mut self, saving: bool) -> Option<Effect> {
        if self.saving == saving {
            return None;
        }
        self.saving = saving;
        Some(Effect::SavingChanged(saving))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn timing() -> Timing {
        Timing {
            settle_window: 5000 * MS,
            heartbeat_loss: 5000 * MS,
            parameter_stall: 7000 * MS,
        }
    }

    fn param(index: u16, count: u16) -> Inbound {
        Inbound::Parameter(ParamValue {
            name: format!("PARAM_{index}"),
            value: index as f32,
            index,
            count,
        })
    }

    fn changed_to(effects: &[Effect], to: LinkState) -> bool {
        effects
            .iter()
            .any(|e| matches!(e, Effect::StateChanged { to: t, .. } if *t == to))
    }

    /// Drive a fresh machine into `SyncingParameters` at `t0 + 5000ms`,
    /// with a heartbeat recorded at the same instant.
    fn syncing(t0: Instant) -> (LinkMachine, Instant) {
        let mut m = LinkMachine::new(timing(), t0);
        m.mark_link_available();
        m.tick(t0);
        m.tick(t0);
        let t = t0 + 5000 * MS;
        m.on_message(&Inbound::Heartbeat, t);
        let effects = m.tick(t);
        assert!(effects.contains(&Effect::RequestParameters));
        assert_eq!(m.state(), LinkState::SyncingParameters);
        (m, t)
    }

    #[test]
    fn stays_disconnected_without_traffic() {
        let t0 = Instant::now();
        let mut m = LinkMachine::new(timing(), t0);
        for s in 0..100 {
            let effects = m.tick(t0 + Duration::from_secs(s));
            assert!(effects.contains(&Effect::HeartbeatAge(None)));
            assert_eq!(m.state(), LinkState::Disconnected);
        }
        assert_eq!(m.heartbeat_age(), None);
        assert!(!m.loading() && !m.saving());
    }

    #[test]
    fn packet_then_settle_window_requests_parameters() {
        let t0 = Instant::now();
        let mut m = LinkMachine::new(timing(), t0);
        m.mark_link_available();

        let effects = m.tick(t0);
        assert!(changed_to(&effects, LinkState::Connected));

        // First tick in Connected records the entry time.
        m.tick(t0);
        assert_eq!(m.sync().initial_connect_at(), Some(t0));

        let effects = m.tick(t0 + 4999 * MS);
        assert_eq!(m.state(), LinkState::Connected);
        assert!(!effects.contains(&Effect::RequestParameters));

        let effects = m.tick(t0 + 5000 * MS);
        assert_eq!(m.state(), LinkState::SyncingParameters);
        assert!(effects.contains(&Effect::RequestParameters));
        assert_eq!(m.sync().initial_connect_at(), None);
    }

    #[test]
    fn full_sync_reaches_idle() {
        let t0 = Instant::now();
        let (mut m, t) = syncing(t0);

        let effects = m.tick(t);
        assert!(effects.contains(&Effect::LoadingChanged(true)));

        for i in 0..10u16 {
            let at = t + (i as u32 * 100) * MS;
            m.on_message(&Inbound::Heartbeat, at);
            m.on_message(&param(i, 10), at);
        }

        let effects = m.tick(t + 1000 * MS);
        assert_eq!(m.state(), LinkState::Idle);
        let ready: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::ParametersReady(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].len(), 10);
        assert_eq!(m.parameters().len(), 10);

        // Idle clears loading and never re-announces the parameters.
        let effects = m.tick(t + 1100 * MS);
        assert!(!m.loading());
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, Effect::ParametersReady(_)))
        );
    }

    #[test]
    fn stall_resets_to_disconnected() {
        let t0 = Instant::now();
        let (mut m, t) = syncing(t0);
        m.on_message(&param(0, 10), t);

        // Keep the heartbeat fresh so only the stall can fire.
        m.on_message(&Inbound::Heartbeat, t + 7000 * MS);
        m.tick(t + 7000 * MS);
        assert_eq!(m.state(), LinkState::SyncingParameters);

        m.on_message(&Inbound::Heartbeat, t + 7001 * MS);
        let effects = m.tick(t + 7001 * MS);
        assert_eq!(m.state(), LinkState::Disconnected);
        assert!(effects.contains(&Effect::LinkLost(LossReason::ParameterStall)));
        assert!(m.parameters().is_empty());
        assert!(!m.is_link_available());
    }

    #[test]
    fn heartbeat_loss_while_syncing() {
        let t0 = Instant::now();
        let (mut m, t) = syncing(t0);
        m.on_message(&param(0, 10), t + 4000 * MS);

        let effects = m.tick(t + 5000 * MS);
        assert_eq!(m.state(), LinkState::Disconnected);
        assert!(effects.contains(&Effect::LinkLost(LossReason::HeartbeatLost)));
        assert!(m.parameters().is_empty());
        assert!(!m.loading() && !m.saving());
    }

    #[test]
    fn never_heard_heartbeat_counts_as_lost() {
        let t0 = Instant::now();
        let mut m = LinkMachine::new(timing(), t0);
        m.mark_link_available();
        m.tick(t0);
        m.tick(t0);
        m.tick(t0 + 5000 * MS);
        assert_eq!(m.state(), LinkState::SyncingParameters);

        let effects = m.tick(t0 + 5001 * MS);
        assert!(effects.contains(&Effect::LinkLost(LossReason::HeartbeatLost)));
        assert_eq!(m.state(), LinkState::Disconnected);
    }

    #[test]
    fn heartbeat_loss_from_idle() {
        let t0 = Instant::now();
        let (mut m, t) = syncing(t0);
        m.on_message(&param(0, 1), t);
        m.tick(t);
        assert_eq!(m.state(), LinkState::Idle);

        m.tick(t + 4999 * MS);
        assert_eq!(m.state(), LinkState::Idle);
        let effects = m.tick(t + 5000 * MS);
        assert_eq!(m.state(), LinkState::Disconnected);
        assert!(effects.contains(&Effect::LinkLost(LossReason::HeartbeatLost)));
        assert!(m.parameters().is_empty());
    }

    #[test]
    fn disconnected_always_clears_flags() {
        let t0 = Instant::now();
        let (mut m, t) = syncing(t0);
        m.tick(t);
        assert!(m.loading());
        assert_eq!(m.set_saving(true), Some(Effect::SavingChanged(true)));

        m.tick(t + 6000 * MS);
        assert_eq!(m.state(), LinkState::Disconnected);
        assert!(!m.loading());
        assert!(!m.saving());
    }

    #[test]
    fn parameters_outside_sync_are_ignored() {
        let t0 = Instant::now();
        let mut m = LinkMachine::new(timing(), t0);
        m.on_message(&param(0, 1), t0);
        assert!(m.parameters().is_empty());
        assert_eq!(m.sync().total_count(), 0);
    }

    #[test]
    fn relink_after_loss_needs_fresh_traffic() {
        let t0 = Instant::now();
        let (mut m, t) = syncing(t0);
        m.tick(t + 6000 * MS);
        assert_eq!(m.state(), LinkState::Disconnected);

        m.tick(t + 7000 * MS);
        assert_eq!(m.state(), LinkState::Disconnected);

        m.mark_link_available();
        let effects = m.tick(t + 8000 * MS);
        assert!(changed_to(&effects, LinkState::Connected));
    }

    #[test]
    fn reset_twice_matches_once() {
        let t0 = Instant::now();
        let (mut m, t) = syncing(t0);
        m.on_message(&param(3, 10), t);

        m.reset(t);
        let once = (m.parameters().clone(), m.sync().total_count(), m.sync().current_index());
        m.reset(t);
        let twice = (m.parameters().clone(), m.sync().total_count(), m.sync().current_index());
        assert_eq!(once, twice);
        assert!(once.0.is_empty());
    }

    #[test]
    fn saving_change_reported_once() {
        let t0 = Instant::now();
        let mut m = LinkMachine::new(timing(), t0);
        assert_eq!(m.set_saving(true), Some(Effect::SavingChanged(true)));
        assert_eq!(m.set_saving(true), None);
    }
}

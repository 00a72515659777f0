//! Run lifecycle controller.
//!
//! A synchronous state machine that owns every piece of per-run state
//! (partner model, sequence tracker, health monitor, reconnection policy,
//! position filter, milestone detectors). It never performs I/O and never
//! reads a clock: every input carries `now`, and every output is an
//! [`Effect`] for the driver to carry out. This is what makes the engine
//! single-writer: the driver task is the only caller.
//!
//! ```text
//! idle ─start_run──▶ awaitingConfirmation ─confirmed──▶ active ⇄ pausedLocally
//!   ▲                       │                             ⇅
//!   │                       │                        pausedRemote
//!   └──────────── ended ◀───┴──── finish / discard / auto-end (any phase)
//! ```

use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::health::{ConnectionHealth, HealthThresholds};
use crate::milestones::{KilometerTracker, LeadTracker};
use crate::partner::{PartnerDisplay, PartnerState};
use crate::reconnect::{BackoffPolicy, ReconnectState, ReconnectionController};
use crate::sequence::SequenceTracker;
use crate::smoothing::PositionSmoother;
use crate::types::{
    ConnectionStatus, Coordinate, EndReason, Heartbeat, LocalProfile, MessageEnvelope,
    PartnerFinished, PartnerProfile, PauseChange, PeerId, RawTelemetrySample, RunConfirmed,
    RunEnded, RunEvent, RunId, RunPhase, RunRecoveryState, RunStarted, Runner, Snapshot,
};
use crate::{Result, SyncError};

#[cfg(test)]
mod tests;

/// Work the driver must carry out on behalf of the lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fire-and-forget send to a peer.
    Send { to: PeerId, message: MessageEnvelope },
    /// Deliver an event to the presentation layer.
    Emit(RunEvent),
    SaveRecovery(RunRecoveryState),
    ClearRecovery,
    /// Run one reconnection attempt.
    Reconnect { attempt: u32 },
    /// Stop the run timers and any reconnect in flight.
    StopTimers,
}

/// Which side of the handshake this device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Default)]
struct LocalProgress {
    distance: f64,
    elapsed_seconds: u32,
    pace: Option<u32>,
    heart_rate: Option<u16>,
    calories: Option<u32>,
    position: Option<Coordinate>,
}

#[derive(Debug)]
struct ActiveRun {
    run_id: RunId,
    role: Role,
    started_at: SystemTime,
    created_at: Instant,
    partner: PartnerState,
    tracker: SequenceTracker,
    health: ConnectionHealth,
    reconnect: ReconnectionController,
    exhaustion_reported: bool,
    smoother: PositionSmoother,
    local: LocalProgress,
    next_sequence: u64,
    last_published_sequence: Option<u64>,
    local_paused: bool,
    paused_snapshot_sent: bool,
    my_km: KilometerTracker,
    partner_km: KilometerTracker,
    lead: LeadTracker,
    status: ConnectionStatus,
}

impl ActiveRun {
    fn recovery_state(&self) -> RunRecoveryState {
        RunRecoveryState {
            run_id: self.run_id.clone(),
            partner_id: self.partner.peer_id().clone(),
            partner_display_name: self.partner.profile.display_name.clone(),
            my_last_distance: self.local.distance,
            my_last_elapsed_seconds: self.local.elapsed_seconds,
            started_at: self.started_at,
            last_sequence: self.last_published_sequence.unwrap_or(0),
        }
    }

    fn partner_id(&self) -> PeerId {
        self.partner.peer_id().clone()
    }
}

/// Orchestrates one run at a time.
#[derive(Debug)]
pub struct RunLifecycle {
    config: EngineConfig,
    local: LocalProfile,
    phase: RunPhase,
    run: Option<ActiveRun>,
}

impl RunLifecycle {
    pub fn new(config: EngineConfig, local: LocalProfile) -> Self {
        Self { config, local, phase: RunPhase::Idle, run: None }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalProfile {
        &self.local
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn role(&self) -> Option<Role> {
        self.run.as_ref().map(|r| r.role)
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run.as_ref().map(|r| &r.run_id)
    }

    pub fn partner(&self) -> Option<&PartnerState> {
        self.run.as_ref().map(|r| &r.partner)
    }

    pub fn partner_id(&self) -> Option<&PeerId> {
        self.run.as_ref().map(|r| r.partner.peer_id())
    }

    /// Partner connection status as last evaluated.
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.run.as_ref().map(|r| r.status)
    }

    pub fn health(&self) -> Option<&ConnectionHealth> {
        self.run.as_ref().map(|r| &r.health)
    }

    pub fn reconnect_state(&self) -> Option<ReconnectState> {
        self.run.as_ref().map(|r| r.reconnect.state())
    }

    /// When the driver must wake up to start the next reconnect attempt.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.run.as_ref().and_then(|r| r.reconnect.deadline())
    }

    pub fn local_distance(&self) -> Option<f64> {
        self.run.as_ref().map(|r| r.local.distance)
    }

    pub fn local_position(&self) -> Option<Coordinate> {
        self.run.as_ref().and_then(|r| r.local.position)
    }

    pub fn display(&self) -> Option<PartnerDisplay> {
        self.run.as_ref().map(|r| r.partner.display(r.status))
    }

    pub fn recovery_state(&self) -> Option<RunRecoveryState> {
        self.run.as_ref().map(ActiveRun::recovery_state)
    }

    /// Invite `partner` to a new run.
    pub fn start_run(
        &mut self,
        run_id: RunId,
        partner: PartnerProfile,
        now: Instant,
        wall: SystemTime,
    ) -> Result<Vec<Effect>> {
        if self.phase.has_run() {
            return Err(SyncError::invalid_transition(self.phase, "start a run"));
        }
        if !run_id.is_valid() || !partner.is_valid() {
            return Err(SyncError::config("run", "identifiers must be non-empty and bounded"));
        }
        if partner.peer_id == self.local.peer_id {
            return Err(SyncError::config("partner", "cannot pair with the local runner"));
        }

        let run = self.new_run(run_id, Role::Initiator, partner, wall, now);
        info!(run = %run.run_id, partner = %run.partner.peer_id(), "Starting run");

        let mut effects = vec![
            Effect::SaveRecovery(run.recovery_state()),
            Effect::Send { to: run.partner_id(), message: self.invitation(&run) },
        ];
        self.run = Some(run);
        self.set_phase(RunPhase::AwaitingConfirmation, &mut effects);
        Ok(effects)
    }

    /// Accept a pending invitation.
    pub fn confirm(&mut self, now: Instant) -> Result<Vec<Effect>> {
        let pending_responder = self.phase == RunPhase::AwaitingConfirmation
            && self.run.as_ref().is_some_and(|r| r.role == Role::Responder);
        if !pending_responder {
            return Err(SyncError::invalid_transition(self.phase, "confirm"));
        }

        let mut effects = Vec::new();
        if let Some(run) = self.run.as_ref() {
            effects.push(Effect::Send {
                to: run.partner_id(),
                message: MessageEnvelope::WatchSideConfirmed(RunConfirmed {
                    run_id: run.run_id.clone(),
                    peer_id: self.local.peer_id.clone(),
                }),
            });
        }
        self.activate(now, &mut effects);
        Ok(effects)
    }

    /// Resume a run persisted before a crash, straight into `active`.
    pub fn resume_from_recovery(
        &mut self,
        state: RunRecoveryState,
        now: Instant,
        wall: SystemTime,
    ) -> Result<Vec<Effect>> {
        if self.phase.has_run() {
            return Err(SyncError::invalid_transition(self.phase, "resume a recovered run"));
        }
        let partner = PartnerProfile::new(state.partner_id.clone(), state.partner_display_name.clone());
        let mut run = self.new_run(state.run_id.clone(), Role::Initiator, partner, state.started_at, now);
        run.local.distance = state.my_last_distance;
        run.local.elapsed_seconds = state.my_last_elapsed_seconds;
        run.my_km = KilometerTracker::starting_at(state.my_last_distance);
        run.partner_km = KilometerTracker::seeded_by_first();
        run.last_published_sequence = Some(state.last_sequence);
        run.next_sequence = state.last_sequence.saturating_add(1);
        info!(
            run = %state.run_id,
            partner = %state.partner_id,
            next_sequence = run.next_sequence,
            "Resuming recovered run"
        );

        let mut effects = Vec::new();
        run.health.record_heartbeat_sent(now);
        effects.push(Effect::Send { to: run.partner_id(), message: self.heartbeat_message(&run, wall) });
        self.run = Some(run);
        self.set_phase(RunPhase::Active, &mut effects);
        Ok(effects)
    }

    pub fn pause(&mut self, now: Instant) -> Result<Vec<Effect>> {
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|r| phase.is_running() && !r.local_paused) else {
            return Err(SyncError::invalid_transition(phase, "pause"));
        };
        run.local_paused = true;
        run.paused_snapshot_sent = false;
        debug!(run = %run.run_id, "Pausing locally");

        let mut effects = vec![Effect::Send {
            to: run.partner_id(),
            message: MessageEnvelope::Pause(pause_change(run, &self.local.peer_id)),
        }];
        self.sync_pause_phase(&mut effects);
        self.refresh_status(now, &mut effects);
        Ok(effects)
    }

    pub fn resume(&mut self, now: Instant) -> Result<Vec<Effect>> {
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|r| phase.is_running() && r.local_paused) else {
            return Err(SyncError::invalid_transition(phase, "resume"));
        };
        run.local_paused = false;
        run.paused_snapshot_sent = false;
        debug!(run = %run.run_id, "Resuming locally");

        let mut effects = vec![Effect::Send {
            to: run.partner_id(),
            message: MessageEnvelope::Resume(pause_change(run, &self.local.peer_id)),
        }];
        self.sync_pause_phase(&mut effects);
        self.refresh_status(now, &mut effects);
        Ok(effects)
    }

    /// The local runner completed the run.
    pub fn finish(&mut self) -> Result<Vec<Effect>> {
        if !self.phase.is_running() {
            return Err(SyncError::invalid_transition(self.phase, "finish"));
        }
        let mut effects = vec![Effect::StopTimers];
        if let Some(run) = self.run.take() {
            info!(run = %run.run_id, distance = run.local.distance, "Run finished");
            effects.push(Effect::Send {
                to: run.partner_id(),
                message: MessageEnvelope::PartnerFinished(PartnerFinished {
                    run_id: run.run_id.clone(),
                    peer_id: self.local.peer_id.clone(),
                    final_distance_meters: run.local.distance,
                    elapsed_seconds: run.local.elapsed_seconds,
                }),
            });
        }
        effects.push(Effect::ClearRecovery);
        self.set_phase(RunPhase::Ended, &mut effects);
        Ok(effects)
    }

    /// Throw the run away, from any phase that has one.
    pub fn discard(&mut self) -> Result<Vec<Effect>> {
        if !self.phase.has_run() {
            return Err(SyncError::invalid_transition(self.phase, "discard"));
        }
        let mut effects = vec![Effect::StopTimers];
        if let Some(run) = self.run.take() {
            info!(run = %run.run_id, "Run discarded");
            effects.push(Effect::Send {
                to: run.partner_id(),
                message: MessageEnvelope::RunEnded(RunEnded {
                    run_id: run.run_id.clone(),
                    peer_id: self.local.peer_id.clone(),
                    reason: EndReason::Discarded,
                }),
            });
        }
        effects.push(Effect::ClearRecovery);
        self.set_phase(RunPhase::Ended, &mut effects);
        Ok(effects)
    }

    /// Start over after reconnection gave up without ending the run.
    pub fn retry_connection(&mut self, now: Instant) -> Result<Vec<Effect>> {
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            return Err(SyncError::invalid_transition(phase, "retry the connection"));
        };
        info!(run = %run.run_id, "Manual reconnection requested");
        run.reconnect.reset();
        run.exhaustion_reported = false;
        let mut effects = Vec::new();
        self.refresh_status(now, &mut effects);
        Ok(effects)
    }

    /// Apply a reading from the local telemetry producer.
    pub fn record_sample(&mut self, sample: RawTelemetrySample, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            trace!(?phase, "Ignoring telemetry sample outside a running run");
            return effects;
        };
        if !sample.distance_meters.is_finite() || sample.distance_meters < 0.0 {
            warn!(distance = sample.distance_meters, "Dropping implausible telemetry sample");
            return effects;
        }

        run.local.distance = sample.distance_meters;
        run.local.elapsed_seconds = sample.elapsed_seconds;
        run.local.pace = sample.pace_sec_per_km;
        run.local.heart_rate = sample.heart_rate_bpm;
        run.local.calories = sample.calories_kcal;
        if let Some(fix) = sample.fix() {
            run.local.position = run.smoother.filter(fix, now);
        }

        if let Some(kilometer) = run.my_km.observe(sample.distance_meters) {
            info!(kilometer, "Kilometer crossed");
            effects.push(Effect::Emit(RunEvent::KilometerCrossed { runner: Runner::Me, kilometer }));
        }
        effects
    }

    /// Publish-timer tick: build the next sequenced snapshot.
    pub fn publish(&mut self, wall: SystemTime) -> Vec<Effect> {
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            return Vec::new();
        };
        if run.partner.finished || (run.local_paused && run.paused_snapshot_sent) {
            return Vec::new();
        }

        let sequence = run.next_sequence;
        run.next_sequence += 1;
        run.last_published_sequence = Some(sequence);
        if run.local_paused {
            run.paused_snapshot_sent = true;
        }

        let snapshot = Snapshot {
            run_id: run.run_id.clone(),
            peer_id: self.local.peer_id.clone(),
            distance_meters: run.local.distance,
            elapsed_seconds: run.local.elapsed_seconds,
            current_pace_sec_per_km: run.local.pace,
            heart_rate_bpm: run.local.heart_rate,
            calories_kcal: run.local.calories,
            latitude: run.local.position.map(|p| p.latitude),
            longitude: run.local.position.map(|p| p.longitude),
            sequence,
            client_recorded_at: wall,
            is_paused: run.local_paused.then_some(true),
        };
        trace!(sequence, distance = snapshot.distance_meters, "Publishing snapshot");

        // Persist first so a crash right after sending never reuses the sequence.
        vec![
            Effect::SaveRecovery(run.recovery_state()),
            Effect::Send { to: run.partner_id(), message: MessageEnvelope::Snapshot(snapshot) },
        ]
    }

    /// Heartbeat-timer tick.
    pub fn heartbeat(&mut self, now: Instant, wall: SystemTime) -> Vec<Effect> {
        let Some(run) = self.run.as_ref() else {
            return Vec::new();
        };
        match self.phase {
            RunPhase::AwaitingConfirmation if run.role == Role::Initiator => {
                trace!(run = %run.run_id, "Re-sending invitation");
                vec![Effect::Send { to: run.partner_id(), message: self.invitation(run) }]
            }
            phase if phase.is_running() && !run.partner.finished => {
                let mut effects =
                    vec![Effect::Send { to: run.partner_id(), message: self.heartbeat_message(run, wall) }];
                // Repeat the pause until resumed; the first notice may have been lost.
                if run.local_paused {
                    effects.push(Effect::Send {
                        to: run.partner_id(),
                        message: MessageEnvelope::Pause(pause_change(run, &self.local.peer_id)),
                    });
                }
                if let Some(run) = self.run.as_mut() {
                    run.health.record_heartbeat_sent(now);
                }
                effects
            }
            _ => Vec::new(),
        }
    }

    /// UI-refresh tick: timeouts, status, interpolation, lead detection.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.phase {
            RunPhase::AwaitingConfirmation => {
                let timeout = self.config.confirmation_timeout;
                let expired = self
                    .run
                    .as_ref()
                    .is_some_and(|r| now.saturating_duration_since(r.created_at) >= timeout);
                if expired {
                    self.auto_end(EndReason::ConfirmationTimeout, &mut effects);
                }
            }
            phase if phase.is_running() => {
                let extended = self
                    .run
                    .as_ref()
                    .is_some_and(|r| !r.partner.finished && r.health.extended_disconnect_elapsed(now));
                if extended {
                    self.auto_end(EndReason::ExtendedDisconnect, &mut effects);
                    return effects;
                }

                self.refresh_status(now, &mut effects);
                if !self.phase.is_running() {
                    return effects;
                }

                let cap = self.config.max_extrapolation_meters;
                if let Some(run) = self.run.as_mut() {
                    let status = run.status;
                    run.partner.interpolate(now, status, cap);
                    if run.partner.has_data() {
                        let gap = (run.local.distance, run.partner.display_distance);
                        if let Some(is_leading) = run.lead.observe(gap.0, gap.1, now) {
                            info!(is_leading, "Lead changed");
                            effects.push(Effect::Emit(RunEvent::LeadChanged { is_leading }));
                        }
                    }
                }
                self.poll_reconnect_into(now, &mut effects);
            }
            _ => {}
        }
        effects
    }

    /// Start a reconnect attempt if one is due.
    pub fn poll_reconnect(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.poll_reconnect_into(now, &mut effects);
        effects
    }

    /// A reconnect attempt returned.
    pub fn reconnect_finished(&mut self, succeeded: bool, now: Instant, wall: SystemTime) -> Vec<Effect> {
        let mut effects = Vec::new();
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            return effects;
        };
        run.reconnect.attempt_finished();
        if succeeded {
            debug!(run = %run.run_id, "Transport re-established, announcing");
            run.health.record_heartbeat_sent(now);
            let message = heartbeat_for(run, &self.local.peer_id, wall);
            effects.push(Effect::Send { to: run.partner_id(), message });
        }
        self.refresh_status(now, &mut effects);
        effects
    }

    /// A fire-and-forget send failed locally.
    pub fn note_send_failure(&mut self) {
        if let Some(run) = self.run.as_mut() {
            run.health.record_send_failure();
        }
    }

    /// Dispatch an inbound message.
    pub fn on_message(&mut self, from: &PeerId, message: MessageEnvelope, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        trace!(%from, kind = message.kind(), "Inbound message");
        match message {
            MessageEnvelope::RunStarted(invite) => self.on_run_started(from, invite, now, &mut effects),
            MessageEnvelope::WatchSideConfirmed(confirmed) => {
                if self.is_current(from, &confirmed.run_id) {
                    self.on_partner_confirmed(now, &mut effects);
                }
            }
            MessageEnvelope::Snapshot(snapshot) => {
                if self.is_current(from, &snapshot.run_id) {
                    self.on_snapshot(snapshot, now, &mut effects);
                }
            }
            MessageEnvelope::PartnerSnapshotRelay(snapshot) => {
                // Relays come from the companion device, not the partner itself.
                if self.run_id() == Some(&snapshot.run_id) {
                    self.on_snapshot(snapshot, now, &mut effects);
                }
            }
            MessageEnvelope::Heartbeat(heartbeat) => {
                if self.is_current(from, &heartbeat.run_id) {
                    self.on_heartbeat(now, &mut effects);
                }
            }
            MessageEnvelope::Pause(notice) => {
                if self.is_current(from, &notice.run_id) {
                    self.on_pause_notice(notice, true, now, &mut effects);
                }
            }
            MessageEnvelope::Resume(notice) => {
                if self.is_current(from, &notice.run_id) {
                    self.on_pause_notice(notice, false, now, &mut effects);
                }
            }
            MessageEnvelope::PartnerFinished(finished) => {
                if self.is_current(from, &finished.run_id) {
                    self.on_partner_finished(finished, &mut effects);
                }
            }
            MessageEnvelope::RunEnded(ended) => {
                if self.is_current(from, &ended.run_id) {
                    info!(reason = ?ended.reason, "Partner ended the run");
                    self.auto_end(EndReason::PartnerEnded, &mut effects);
                }
            }
        }
        effects
    }

    fn is_current(&self, from: &PeerId, run_id: &RunId) -> bool {
        let current = self
            .run
            .as_ref()
            .is_some_and(|r| &r.run_id == run_id && r.partner.peer_id() == from);
        if !current {
            debug!(%from, run = %run_id, "Ignoring message for another run or peer");
        }
        current
    }

    fn on_run_started(
        &mut self,
        from: &PeerId,
        invite: RunStarted,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if &invite.profile.peer_id != from || invite.profile.peer_id == self.local.peer_id {
            warn!(%from, "Dropping invitation with mismatched sender");
            return;
        }
        match self.run.as_ref() {
            None => {
                let run =
                    self.new_run(invite.run_id, Role::Responder, invite.profile, invite.started_at, now);
                info!(run = %run.run_id, partner = %run.partner.peer_id(), "Received run invitation");
                self.run = Some(run);
                self.set_phase(RunPhase::AwaitingConfirmation, effects);
            }
            Some(run) if run.run_id == invite.run_id && run.partner.peer_id() == from => {
                if run.role == Role::Responder && self.phase.is_running() {
                    debug!(run = %run.run_id, "Invitation repeated, re-sending confirmation");
                    effects.push(Effect::Send {
                        to: run.partner_id(),
                        message: MessageEnvelope::WatchSideConfirmed(RunConfirmed {
                            run_id: run.run_id.clone(),
                            peer_id: self.local.peer_id.clone(),
                        }),
                    });
                }
            }
            Some(run) => {
                debug!(current = %run.run_id, offered = %invite.run_id, "Busy, ignoring invitation");
            }
        }
    }

    /// The partner's confirmation, or anything that implies it.
    fn on_partner_confirmed(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let awaiting = self.phase == RunPhase::AwaitingConfirmation
            && self.run.as_ref().is_some_and(|r| r.role == Role::Initiator);
        if awaiting {
            self.activate(now, effects);
        }
    }

    fn on_snapshot(&mut self, snapshot: Snapshot, now: Instant, effects: &mut Vec<Effect>) {
        if self.partner_id() != Some(&snapshot.peer_id) {
            debug!(peer = %snapshot.peer_id, "Ignoring snapshot from unknown peer");
            return;
        }
        self.on_partner_confirmed(now, effects);
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            return;
        };
        if !run.tracker.admit_snapshot(&snapshot) {
            debug!(sequence = snapshot.sequence, "Dropping stale or duplicate snapshot");
            return;
        }
        if run.partner.finished {
            return;
        }

        run.partner.apply_snapshot(&snapshot, now);
        run.health.record_data_received(now, snapshot.paused());
        run.reconnect.reset();
        run.exhaustion_reported = false;
        if let Some(kilometer) = run.partner_km.observe(snapshot.distance_meters) {
            info!(kilometer, "Partner crossed kilometer");
            effects.push(Effect::Emit(RunEvent::KilometerCrossed { runner: Runner::Partner, kilometer }));
        }
        trace!(sequence = snapshot.sequence, distance = snapshot.distance_meters, "Snapshot admitted");

        self.sync_pause_phase(effects);
        self.refresh_status(now, effects);
    }

    fn on_heartbeat(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        self.on_partner_confirmed(now, effects);
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            return;
        };
        run.health.record_heartbeat_received(now);
        run.reconnect.reset();
        run.exhaustion_reported = false;
        self.refresh_status(now, effects);
    }

    fn on_pause_notice(&mut self, notice: PauseChange, paused: bool, now: Instant, effects: &mut Vec<Effect>) {
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            return;
        };
        // Any message from the partner proves the link is alive.
        run.health.record_heartbeat_received(now);
        let latest = run.partner.last_sequence.unwrap_or(0);
        if notice.as_of_sequence < latest {
            debug!(as_of = notice.as_of_sequence, latest, "Ignoring outdated pause notice");
        } else if !run.partner.finished {
            run.partner.is_paused = paused;
            run.health.set_partner_paused(paused);
        }
        self.sync_pause_phase(effects);
        self.refresh_status(now, effects);
    }

    fn on_partner_finished(&mut self, finished: PartnerFinished, effects: &mut Vec<Effect>) {
        let phase = self.phase;
        let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) else {
            return;
        };
        if run.partner.finished {
            return;
        }
        info!(distance = finished.final_distance_meters, "Partner finished");
        run.partner.apply_finished(finished.final_distance_meters, finished.elapsed_seconds);
        run.health.set_partner_paused(false);
        run.reconnect.reset();
        if let Some(kilometer) = run.partner_km.observe(finished.final_distance_meters) {
            effects.push(Effect::Emit(RunEvent::KilometerCrossed { runner: Runner::Partner, kilometer }));
        }
        effects.push(Effect::Emit(RunEvent::PartnerFinished {
            final_distance_meters: finished.final_distance_meters,
            elapsed_seconds: finished.elapsed_seconds,
        }));
        self.sync_pause_phase(effects);
    }

    fn activate(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let thresholds = HealthThresholds::from(&self.config);
        if let Some(run) = self.run.as_mut() {
            run.health = ConnectionHealth::new(thresholds, now);
            run.status = ConnectionStatus::Connected;
            info!(run = %run.run_id, partner = %run.partner.peer_id(), "Run active");
            effects.push(Effect::SaveRecovery(run.recovery_state()));
        }
        self.set_phase(RunPhase::Active, effects);
    }

    /// Re-evaluate the partner status; schedules reconnects and handles exhaustion.
    fn refresh_status(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let phase = self.phase;
        let auto_end = self.config.auto_end_on_reconnect_exhausted;
        let Some(run) = self.run.as_mut().filter(|r| phase.is_running() && !r.partner.finished) else {
            return;
        };

        let status = run.health.status(now);
        if status != run.status {
            info!(from = ?run.status, to = ?status, "Partner connection status changed");
            run.status = status;
            effects.push(Effect::Emit(RunEvent::ConnectionStatusChanged { status }));
        }

        if status != ConnectionStatus::Disconnected {
            return;
        }
        if run.reconnect.schedule(now) != ReconnectState::Exhausted || run.exhaustion_reported {
            return;
        }
        run.exhaustion_reported = true;
        if auto_end {
            self.auto_end(EndReason::ReconnectExhausted, effects);
        } else {
            let attempts = run.reconnect.attempts_made();
            warn!(attempts, "Reconnection exhausted, waiting for manual retry");
            effects.push(Effect::Emit(RunEvent::ReconnectExhausted { attempts }));
        }
    }

    fn poll_reconnect_into(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        let phase = self.phase;
        if let Some(run) = self.run.as_mut().filter(|_| phase.is_running()) {
            if let Some(attempt) = run.reconnect.begin_due(now) {
                info!(attempt, "Attempting to reconnect");
                effects.push(Effect::Reconnect { attempt });
            }
        }
    }

    fn auto_end(&mut self, reason: EndReason, effects: &mut Vec<Effect>) {
        let Some(run) = self.run.take() else {
            return;
        };
        warn!(run = %run.run_id, ?reason, "Ending run automatically");
        effects.push(Effect::StopTimers);
        if reason != EndReason::PartnerEnded {
            effects.push(Effect::Send {
                to: run.partner_id(),
                message: MessageEnvelope::RunEnded(RunEnded {
                    run_id: run.run_id.clone(),
                    peer_id: self.local.peer_id.clone(),
                    reason,
                }),
            });
        }
        effects.push(Effect::ClearRecovery);
        effects.push(Effect::Emit(RunEvent::RunAutoEnded { reason }));
        self.set_phase(RunPhase::Ended, effects);
    }

    /// Derive the running phase from the two pause flags.
    fn sync_pause_phase(&mut self, effects: &mut Vec<Effect>) {
        if !self.phase.is_running() {
            return;
        }
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let desired = if run.local_paused {
            RunPhase::PausedLocally
        } else if run.partner.is_paused && !run.partner.finished {
            RunPhase::PausedRemote
        } else {
            RunPhase::Active
        };
        self.set_phase(desired, effects);
    }

    fn set_phase(&mut self, phase: RunPhase, effects: &mut Vec<Effect>) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Run phase changed");
            self.phase = phase;
            effects.push(Effect::Emit(RunEvent::PhaseChanged { phase }));
        }
    }

    fn new_run(
        &self,
        run_id: RunId,
        role: Role,
        partner: PartnerProfile,
        started_at: SystemTime,
        now: Instant,
    ) -> ActiveRun {
        let config = &self.config;
        ActiveRun {
            tracker: SequenceTracker::new(run_id.clone()),
            run_id,
            role,
            started_at,
            created_at: now,
            partner: PartnerState::new(partner),
            health: ConnectionHealth::new(HealthThresholds::from(config), now),
            reconnect: ReconnectionController::new(BackoffPolicy::from(config)),
            exhaustion_reported: false,
            smoother: PositionSmoother::new(
                config.position_min_accuracy_meters,
                config.position_process_noise,
            ),
            local: LocalProgress::default(),
            next_sequence: 1,
            last_published_sequence: None,
            local_paused: false,
            paused_snapshot_sent: false,
            my_km: KilometerTracker::new(),
            partner_km: KilometerTracker::new(),
            lead: LeadTracker::new(config.lead_change_debounce, config.lead_change_min_margin_meters),
            status: ConnectionStatus::Connected,
        }
    }

    fn invitation(&self, run: &ActiveRun) -> MessageEnvelope {
        MessageEnvelope::RunStarted(RunStarted {
            run_id: run.run_id.clone(),
            profile: PartnerProfile::from(&self.local),
            started_at: run.started_at,
        })
    }

    fn heartbeat_message(&self, run: &ActiveRun, wall: SystemTime) -> MessageEnvelope {
        heartbeat_for(run, &self.local.peer_id, wall)
    }
}

fn pause_change(run: &ActiveRun, local: &PeerId) -> PauseChange {
    PauseChange {
        run_id: run.run_id.clone(),
        peer_id: local.clone(),
        as_of_sequence: run.last_published_sequence.unwrap_or(0),
    }
}

fn heartbeat_for(run: &ActiveRun, local: &PeerId, wall: SystemTime) -> MessageEnvelope {
    MessageEnvelope::Heartbeat(Heartbeat {
        run_id: run.run_id.clone(),
        peer_id: local.clone(),
        sent_at: wall,
    })
}

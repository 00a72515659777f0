use super::*;
use crate::test_utils::*;
use crate::types::PositionFix;
use std::time::Duration;

fn bob() -> PeerId {
    PeerId::new(FIXTURE_PARTNER)
}

fn run_id() -> RunId {
    RunId::new(FIXTURE_RUN)
}

fn lifecycle_with(config: EngineConfig) -> RunLifecycle {
    init_tracing();
    RunLifecycle::new(config, local_profile())
}

fn confirmed() -> MessageEnvelope {
    MessageEnvelope::WatchSideConfirmed(RunConfirmed { run_id: run_id(), peer_id: bob() })
}

/// A run that is already active at `t0`.
fn active_with(config: EngineConfig, t0: Instant) -> RunLifecycle {
    let mut lc = lifecycle_with(config);
    lc.start_run(run_id(), partner_profile(), t0, wall_clock()).expect("start");
    lc.on_message(&bob(), confirmed(), t0);
    assert_eq!(lc.phase(), RunPhase::Active);
    lc
}

fn active(t0: Instant) -> RunLifecycle {
    active_with(test_config(), t0)
}

fn events(effects: &[Effect]) -> Vec<RunEvent> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Emit(event) => Some(event.clone()),
            _ => None,
        })
        .collect()
}

fn sent(effects: &[Effect]) -> Vec<MessageEnvelope> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Send { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn snapshot_with_pace(sequence: u64, distance: f64, pace: u32) -> MessageEnvelope {
    let mut snapshot = snapshot_fixture(sequence, distance);
    snapshot.current_pace_sec_per_km = Some(pace);
    MessageEnvelope::Snapshot(snapshot)
}

fn at(t0: Instant, ms: u64) -> Instant {
    t0 + Duration::from_millis(ms)
}

/// Drive refresh ticks every `step_ms`, failing every reconnect attempt.
fn drive(lc: &mut RunLifecycle, t0: Instant, from_ms: u64, to_ms: u64, step_ms: u64) -> Vec<Effect> {
    let mut all = Vec::new();
    let mut ms = from_ms;
    while ms <= to_ms && lc.phase().has_run() {
        let now = at(t0, ms);
        let effects = lc.tick(now);
        for effect in &effects {
            if let Effect::Reconnect { .. } = effect {
                all.extend(lc.reconnect_finished(false, now, wall_clock()));
            }
        }
        all.extend(effects);
        ms += step_ms;
    }
    all
}

#[test]
fn initiator_handshake() {
    let t0 = Instant::now();
    let mut lc = lifecycle_with(test_config());
    let effects = lc.start_run(run_id(), partner_profile(), t0, wall_clock()).expect("start");

    assert_eq!(lc.phase(), RunPhase::AwaitingConfirmation);
    assert_eq!(lc.role(), Some(Role::Initiator));
    assert!(matches!(effects[0], Effect::SaveRecovery(_)));
    match &sent(&effects)[..] {
        [MessageEnvelope::RunStarted(invite)] => {
            assert_eq!(invite.run_id, run_id());
            assert_eq!(invite.profile.peer_id.as_str(), FIXTURE_LOCAL);
        }
        other => panic!("unexpected sends {:?}", other),
    }
    assert_eq!(
        events(&effects),
        vec![RunEvent::PhaseChanged { phase: RunPhase::AwaitingConfirmation }]
    );

    let effects = lc.on_message(&bob(), confirmed(), t0);
    assert_eq!(lc.phase(), RunPhase::Active);
    assert_eq!(events(&effects), vec![RunEvent::PhaseChanged { phase: RunPhase::Active }]);
}

#[test]
fn start_is_rejected_while_a_run_exists() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    let err = lc.start_run(RunId::new("other"), partner_profile(), t0, wall_clock()).unwrap_err();
    assert!(matches!(err, SyncError::InvalidTransition { .. }));
}

#[test]
fn cannot_pair_with_self() {
    let mut lc = lifecycle_with(test_config());
    let me = PartnerProfile::new(FIXTURE_LOCAL, "Alice");
    let err = lc.start_run(run_id(), me, Instant::now(), wall_clock()).unwrap_err();
    assert!(matches!(err, SyncError::Config { .. }));
    assert_eq!(lc.phase(), RunPhase::Idle);
}

#[test]
fn responder_confirms_and_repeats_confirmation() {
    let t0 = Instant::now();
    let mut lc = lifecycle_with(test_config());
    let invite = MessageEnvelope::RunStarted(RunStarted {
        run_id: run_id(),
        profile: partner_profile(),
        started_at: wall_clock(),
    });

    lc.on_message(&bob(), invite.clone(), t0);
    assert_eq!(lc.phase(), RunPhase::AwaitingConfirmation);
    assert_eq!(lc.role(), Some(Role::Responder));

    // Snapshots before confirming do not activate a responder.
    lc.on_message(&bob(), snapshot_with_pace(1, 10.0, 300), t0);
    assert_eq!(lc.phase(), RunPhase::AwaitingConfirmation);

    let effects = lc.confirm(t0).expect("confirm");
    assert_eq!(lc.phase(), RunPhase::Active);
    assert!(matches!(sent(&effects)[..], [MessageEnvelope::WatchSideConfirmed(_)]));

    let effects = lc.on_message(&bob(), invite, t0);
    assert!(matches!(sent(&effects)[..], [MessageEnvelope::WatchSideConfirmed(_)]));
}

#[test]
fn confirm_requires_a_pending_invitation() {
    let mut lc = lifecycle_with(test_config());
    assert!(lc.confirm(Instant::now()).is_err());
}

#[test]
fn invitation_is_resent_on_heartbeat_until_confirmed() {
    let t0 = Instant::now();
    let mut lc = lifecycle_with(test_config());
    lc.start_run(run_id(), partner_profile(), t0, wall_clock()).expect("start");

    let effects = lc.heartbeat(at(t0, 3_000), wall_clock());
    assert!(matches!(sent(&effects)[..], [MessageEnvelope::RunStarted(_)]));
}

#[test]
fn confirmation_timeout_ends_the_run() {
    let t0 = Instant::now();
    let mut lc = lifecycle_with(test_config());
    lc.start_run(run_id(), partner_profile(), t0, wall_clock()).expect("start");

    assert!(lc.tick(at(t0, 59_000)).is_empty());
    let effects = lc.tick(at(t0, 60_000));
    assert_eq!(lc.phase(), RunPhase::Ended);
    assert!(events(&effects).contains(&RunEvent::RunAutoEnded { reason: EndReason::ConfirmationTimeout }));
    assert!(effects.contains(&Effect::ClearRecovery));
    assert_eq!(effects[0], Effect::StopTimers);
}

#[test]
fn partner_snapshot_implies_confirmation() {
    let t0 = Instant::now();
    let mut lc = lifecycle_with(test_config());
    lc.start_run(run_id(), partner_profile(), t0, wall_clock()).expect("start");

    lc.on_message(&bob(), snapshot_with_pace(1, 20.0, 300), t0);
    assert_eq!(lc.phase(), RunPhase::Active);
    assert_eq!(lc.partner().map(|p| p.raw_distance), Some(20.0));
}

#[test]
fn display_dead_reckons_then_freezes_as_link_degrades() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.on_message(&bob(), snapshot_with_pace(5, 1000.0, 300), t0);

    drive(&mut lc, t0, 100, 4_000, 100);
    let display = lc.display().expect("display");
    assert!((display.distance_meters - 1013.333).abs() < 0.01, "{}", display.distance_meters);
    assert_eq!(display.status, ConnectionStatus::Connected);

    let effects = drive(&mut lc, t0, 4_100, 9_000, 100);
    assert_eq!(lc.status(), Some(ConnectionStatus::Stale));
    assert!(events(&effects).contains(&RunEvent::ConnectionStatusChanged { status: ConnectionStatus::Stale }));
    let frozen = lc.display().expect("display").distance_meters;
    assert!((frozen - 1026.667).abs() < 0.5, "{}", frozen);

    let effects = drive(&mut lc, t0, 9_100, 16_000, 100);
    assert_eq!(lc.status(), Some(ConnectionStatus::Disconnected));
    assert!(events(&effects).contains(&RunEvent::ConnectionStatusChanged {
        status: ConnectionStatus::Disconnected
    }));
    assert_eq!(lc.display().expect("display").distance_meters, frozen);
    assert_eq!(lc.partner().map(|p| p.raw_distance), Some(1000.0));
}

#[test]
fn out_of_order_and_duplicate_snapshots_are_dropped() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.on_message(&bob(), snapshot_with_pace(7, 700.0, 300), t0);
    lc.on_message(&bob(), snapshot_with_pace(6, 600.0, 300), t0);
    lc.on_message(&bob(), snapshot_with_pace(7, 650.0, 300), t0);

    let partner = lc.partner().expect("partner");
    assert_eq!(partner.raw_distance, 700.0);
    assert_eq!(partner.last_sequence, Some(7));
}

#[test]
fn snapshots_from_other_runs_or_peers_are_ignored() {
    let t0 = Instant::now();
    let mut lc = active(t0);

    let mut other_run = snapshot_fixture(1, 300.0);
    other_run.run_id = RunId::new("other");
    lc.on_message(&bob(), MessageEnvelope::Snapshot(other_run), t0);

    let mut impostor = snapshot_fixture(1, 300.0);
    impostor.peer_id = PeerId::new("mallory");
    lc.on_message(&PeerId::new("mallory"), MessageEnvelope::Snapshot(impostor), t0);

    assert!(!lc.partner().expect("partner").has_data());
}

#[test]
fn relayed_snapshots_are_admitted() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    let relay = MessageEnvelope::PartnerSnapshotRelay(snapshot_fixture(3, 450.0));
    lc.on_message(&PeerId::new("phone"), relay, t0);
    assert_eq!(lc.partner().map(|p| p.raw_distance), Some(450.0));
}

#[test]
fn kilometer_events_fire_once_for_each_runner() {
    let t0 = Instant::now();
    let mut lc = active(t0);

    let mut effects = Vec::new();
    for (seq, distance) in [(1, 999.0), (2, 1001.0), (3, 1002.0)] {
        effects.extend(lc.on_message(&bob(), snapshot_with_pace(seq, distance, 300), t0));
    }
    for distance in [999.0, 1001.0, 1002.0] {
        effects.extend(lc.record_sample(sample_at(distance), t0));
    }

    let crossings: Vec<RunEvent> = events(&effects)
        .into_iter()
        .filter(|e| matches!(e, RunEvent::KilometerCrossed { .. }))
        .collect();
    assert_eq!(
        crossings,
        vec![
            RunEvent::KilometerCrossed { runner: Runner::Partner, kilometer: 1 },
            RunEvent::KilometerCrossed { runner: Runner::Me, kilometer: 1 },
        ]
    );
}

#[test]
fn inaccurate_fix_leaves_position_unchanged() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.record_sample(sample_at(10.0).with_fix(47.6062, -122.3321, 8.0), t0);
    let before = lc.local_position().expect("first fix");

    lc.record_sample(sample_at(20.0).with_fix(47.7, -122.0, 80.0), at(t0, 1_000));
    assert_eq!(lc.local_position(), Some(before));

    let fix = sample_at(20.0).with_fix(47.7, -122.0, 80.0).fix();
    assert_eq!(fix, Some(PositionFix { latitude: 47.7, longitude: -122.0, horizontal_accuracy: 80.0 }));
}

#[test]
fn published_sequences_start_at_one_and_increase() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.record_sample(sample_at(250.0), t0);

    let sequences: Vec<u64> = (0..4)
        .flat_map(|_| sent(&lc.publish(wall_clock())))
        .filter_map(|m| match m {
            MessageEnvelope::Snapshot(s) => Some(s.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[test]
fn publish_persists_before_sending() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    let effects = lc.publish(wall_clock());
    match &effects[..] {
        [Effect::SaveRecovery(state), Effect::Send { message: MessageEnvelope::Snapshot(s), .. }] => {
            assert_eq!(state.last_sequence, s.sequence);
        }
        other => panic!("unexpected effects {:?}", other),
    }
}

#[test]
fn local_pause_sends_one_paused_snapshot_then_heartbeats_only() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.publish(wall_clock());

    let effects = lc.pause(t0).expect("pause");
    assert_eq!(lc.phase(), RunPhase::PausedLocally);
    match &sent(&effects)[..] {
        [MessageEnvelope::Pause(notice)] => assert_eq!(notice.as_of_sequence, 1),
        other => panic!("unexpected sends {:?}", other),
    }
    assert!(lc.pause(t0).is_err());

    match &sent(&lc.publish(wall_clock()))[..] {
        [MessageEnvelope::Snapshot(s)] => assert!(s.paused()),
        other => panic!("unexpected sends {:?}", other),
    }
    assert!(lc.publish(wall_clock()).is_empty());
    match &sent(&lc.heartbeat(t0, wall_clock()))[..] {
        [MessageEnvelope::Heartbeat(_), MessageEnvelope::Pause(notice)] => assert_eq!(notice.as_of_sequence, 2),
        other => panic!("unexpected sends {:?}", other),
    }

    let effects = lc.resume(t0).expect("resume");
    assert_eq!(lc.phase(), RunPhase::Active);
    assert!(matches!(sent(&effects)[..], [MessageEnvelope::Resume(_)]));
    match &sent(&lc.publish(wall_clock()))[..] {
        [MessageEnvelope::Snapshot(s)] => {
            assert!(!s.paused());
            assert_eq!(s.sequence, 3);
        }
        other => panic!("unexpected sends {:?}", other),
    }
}

/// Bob's side of a run Alice started, already confirmed.
fn responder_for_alice(t0: Instant) -> RunLifecycle {
    init_tracing();
    let mut lc = RunLifecycle::new(test_config(), LocalProfile::new(FIXTURE_PARTNER, "Bob"));
    let invite = MessageEnvelope::RunStarted(RunStarted {
        run_id: run_id(),
        profile: PartnerProfile::from(&local_profile()),
        started_at: wall_clock(),
    });
    lc.on_message(&PeerId::new(FIXTURE_LOCAL), invite, t0);
    lc.confirm(t0).expect("confirm");
    assert_eq!(lc.phase(), RunPhase::Active);
    lc
}

#[test]
fn pause_reaches_partner_after_first_notices_are_lost() {
    let t0 = Instant::now();
    let alice_id = PeerId::new(FIXTURE_LOCAL);
    let mut alice = active(t0);
    let mut bob_side = responder_for_alice(t0);

    alice.record_sample(sample_at(1_000.0), t0);
    for message in sent(&alice.publish(wall_clock())) {
        bob_side.on_message(&alice_id, message, t0);
    }

    // Paused during an outage: the notice and the paused snapshot never arrive.
    alice.pause(at(t0, 1_000)).expect("pause");
    alice.publish(wall_clock());
    assert_eq!(bob_side.phase(), RunPhase::Active);

    let heartbeat = alice.heartbeat(at(t0, 3_000), wall_clock());
    for message in sent(&heartbeat) {
        bob_side.on_message(&alice_id, message, at(t0, 3_000));
    }
    assert_eq!(bob_side.phase(), RunPhase::PausedRemote);
    assert_eq!(bob_side.status(), Some(ConnectionStatus::Paused));

    bob_side.tick(at(t0, 10_000));
    assert_eq!(bob_side.display().expect("display").distance_meters, 1_000.0);

    // Every later heartbeat repeats the pause until resumed.
    for second in [6_000, 9_000, 12_000] {
        let repeated = sent(&alice.heartbeat(at(t0, second), wall_clock()));
        assert!(repeated.iter().any(|m| matches!(m, MessageEnvelope::Pause(_))));
    }
    alice.resume(at(t0, 13_000)).expect("resume");
    let after_resume = sent(&alice.heartbeat(at(t0, 15_000), wall_clock()));
    assert!(matches!(after_resume[..], [MessageEnvelope::Heartbeat(_)]));
}

#[test]
fn remote_pause_holds_status_and_ignores_outdated_resume() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    let mut paused = snapshot_fixture(3, 800.0);
    paused.is_paused = Some(true);

    let effects = lc.on_message(&bob(), MessageEnvelope::Snapshot(paused), t0);
    assert_eq!(lc.phase(), RunPhase::PausedRemote);
    assert!(events(&effects).contains(&RunEvent::ConnectionStatusChanged { status: ConnectionStatus::Paused }));

    drive(&mut lc, t0, 1_000, 30_000, 1_000);
    assert_eq!(lc.status(), Some(ConnectionStatus::Paused));
    assert_eq!(lc.display().expect("display").distance_meters, 800.0);

    let outdated = PauseChange { run_id: run_id(), peer_id: bob(), as_of_sequence: 2 };
    lc.on_message(&bob(), MessageEnvelope::Resume(outdated), at(t0, 31_000));
    assert_eq!(lc.phase(), RunPhase::PausedRemote);

    let current = PauseChange { run_id: run_id(), peer_id: bob(), as_of_sequence: 3 };
    lc.on_message(&bob(), MessageEnvelope::Resume(current), at(t0, 32_000));
    assert_eq!(lc.phase(), RunPhase::Active);
    assert_eq!(lc.status(), Some(ConnectionStatus::Connected));
}

#[test]
fn finish_notifies_partner_and_clears_recovery() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.record_sample(sample_at(5_000.0), t0);

    let effects = lc.finish().expect("finish");
    assert_eq!(effects[0], Effect::StopTimers);
    assert_eq!(lc.phase(), RunPhase::Ended);
    assert!(effects.contains(&Effect::ClearRecovery));
    match &sent(&effects)[..] {
        [MessageEnvelope::PartnerFinished(fin)] => assert_eq!(fin.final_distance_meters, 5_000.0),
        other => panic!("unexpected sends {:?}", other),
    }
    assert!(lc.finish().is_err());
    assert!(lc.display().is_none());
}

#[test]
fn discard_from_awaiting_sends_run_ended() {
    let t0 = Instant::now();
    let mut lc = lifecycle_with(test_config());
    lc.start_run(run_id(), partner_profile(), t0, wall_clock()).expect("start");

    let effects = lc.discard().expect("discard");
    assert_eq!(lc.phase(), RunPhase::Ended);
    match &sent(&effects)[..] {
        [MessageEnvelope::RunEnded(ended)] => assert_eq!(ended.reason, EndReason::Discarded),
        other => panic!("unexpected sends {:?}", other),
    }
    assert!(lc.discard().is_err());
}

#[test]
fn partner_finishing_freezes_display() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.on_message(&bob(), snapshot_with_pace(4, 4_900.0, 300), t0);

    let fin = PartnerFinished {
        run_id: run_id(),
        peer_id: bob(),
        final_distance_meters: 5_000.0,
        elapsed_seconds: 1_500,
    };
    let effects = lc.on_message(&bob(), MessageEnvelope::PartnerFinished(fin), at(t0, 1_000));
    assert!(events(&effects).contains(&RunEvent::PartnerFinished {
        final_distance_meters: 5_000.0,
        elapsed_seconds: 1_500
    }));

    // No status churn and no reconnects for a partner who is done.
    let effects = drive(&mut lc, t0, 2_000, 60_000, 1_000);
    assert!(effects.iter().all(|e| !matches!(e, Effect::Reconnect { .. })));
    let display = lc.display().expect("display");
    assert!(display.finished);
    assert_eq!(display.distance_meters, 5_000.0);
    assert_eq!(lc.phase(), RunPhase::Active);
}

#[test]
fn partner_ending_the_run_ends_it_locally_without_echo() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    let ended = RunEnded { run_id: run_id(), peer_id: bob(), reason: EndReason::Discarded };
    let effects = lc.on_message(&bob(), MessageEnvelope::RunEnded(ended), t0);

    assert_eq!(lc.phase(), RunPhase::Ended);
    assert!(sent(&effects).is_empty());
    assert!(events(&effects).contains(&RunEvent::RunAutoEnded { reason: EndReason::PartnerEnded }));
}

#[test]
fn disconnect_schedules_reconnects_with_backoff() {
    let t0 = Instant::now();
    let mut lc = active(t0);

    lc.tick(at(t0, 15_000));
    assert_eq!(lc.status(), Some(ConnectionStatus::Disconnected));
    assert_eq!(lc.reconnect_deadline(), Some(at(t0, 16_000)));

    let effects = lc.tick(at(t0, 16_000));
    assert!(effects.contains(&Effect::Reconnect { attempt: 0 }));
    assert_eq!(lc.reconnect_deadline(), None);

    lc.reconnect_finished(false, at(t0, 16_500), wall_clock());
    assert_eq!(lc.reconnect_deadline(), Some(at(t0, 18_500)));
}

#[test]
fn contact_resets_backoff_and_status() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    drive(&mut lc, t0, 15_000, 20_000, 1_000);
    assert!(lc.reconnect_state().is_some_and(|s| s != ReconnectState::Idle));

    let heartbeat = MessageEnvelope::Heartbeat(Heartbeat { run_id: run_id(), peer_id: bob(), sent_at: wall_clock() });
    let effects = lc.on_message(&bob(), heartbeat, at(t0, 21_000));
    assert_eq!(lc.status(), Some(ConnectionStatus::Connected));
    assert_eq!(lc.reconnect_state(), Some(ReconnectState::Idle));
    assert!(events(&effects).contains(&RunEvent::ConnectionStatusChanged { status: ConnectionStatus::Connected }));
}

#[test]
fn successful_reconnect_announces_with_heartbeat() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.tick(at(t0, 15_000));
    lc.tick(at(t0, 16_000));
    let effects = lc.reconnect_finished(true, at(t0, 16_100), wall_clock());
    assert!(matches!(sent(&effects)[..], [MessageEnvelope::Heartbeat(_)]));
}

#[test]
fn exhausted_reconnection_auto_ends() {
    let t0 = Instant::now();
    let config = EngineConfig { reconnect_max_attempts: 1, ..test_config() };
    let mut lc = active_with(config, t0);

    let effects = drive(&mut lc, t0, 1_000, 60_000, 100);
    assert_eq!(lc.phase(), RunPhase::Ended);
    let attempts = effects.iter().filter(|e| matches!(e, Effect::Reconnect { .. })).count();
    assert_eq!(attempts, 2);
    assert!(events(&effects).contains(&RunEvent::RunAutoEnded { reason: EndReason::ReconnectExhausted }));
}

#[test]
fn exhaustion_without_auto_end_waits_for_manual_retry() {
    let t0 = Instant::now();
    let config = EngineConfig { reconnect_max_attempts: 1, auto_end_on_reconnect_exhausted: false, ..test_config() };
    let mut lc = active_with(config, t0);

    let effects = drive(&mut lc, t0, 1_000, 60_000, 100);
    assert_eq!(lc.phase(), RunPhase::Active);
    assert_eq!(lc.reconnect_state(), Some(ReconnectState::Exhausted));
    let exhausted: Vec<_> = events(&effects)
        .into_iter()
        .filter(|e| matches!(e, RunEvent::ReconnectExhausted { .. }))
        .collect();
    assert_eq!(exhausted, vec![RunEvent::ReconnectExhausted { attempts: 2 }]);

    lc.retry_connection(at(t0, 61_000)).expect("retry");
    assert_eq!(lc.reconnect_deadline(), Some(at(t0, 62_000)));
}

#[test]
fn extended_disconnect_auto_ends() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    let effects = drive(&mut lc, t0, 1_000, 200_000, 1_000);
    assert_eq!(lc.phase(), RunPhase::Ended);
    assert!(events(&effects).contains(&RunEvent::RunAutoEnded { reason: EndReason::ExtendedDisconnect }));
    match sent(&effects).last() {
        Some(MessageEnvelope::RunEnded(ended)) => assert_eq!(ended.reason, EndReason::ExtendedDisconnect),
        other => panic!("unexpected last send {:?}", other),
    }
}

#[test]
fn recovered_run_continues_sequence() {
    let t0 = Instant::now();
    let mut lc = lifecycle_with(test_config());
    let state = RunRecoveryState {
        run_id: run_id(),
        partner_id: bob(),
        partner_display_name: "Bob".into(),
        my_last_distance: 2_300.0,
        my_last_elapsed_seconds: 690,
        started_at: wall_clock(),
        last_sequence: 41,
    };

    let effects = lc.resume_from_recovery(state, t0, wall_clock()).expect("resume");
    assert_eq!(lc.phase(), RunPhase::Active);
    assert!(matches!(sent(&effects)[..], [MessageEnvelope::Heartbeat(_)]));

    match &sent(&lc.publish(wall_clock()))[..] {
        [MessageEnvelope::Snapshot(s)] => {
            assert_eq!(s.sequence, 42);
            assert_eq!(s.distance_meters, 2_300.0);
        }
        other => panic!("unexpected sends {:?}", other),
    }
    // Already-covered kilometers are not announced again, for either runner.
    assert!(events(&lc.record_sample(sample_at(2_500.0), t0)).is_empty());
    let effects = lc.on_message(&bob(), MessageEnvelope::Snapshot(snapshot_fixture(30, 2_400.0)), t0);
    assert!(events(&effects).iter().all(|e| !matches!(e, RunEvent::KilometerCrossed { .. })));
    let effects = lc.on_message(&bob(), MessageEnvelope::Snapshot(snapshot_fixture(31, 3_010.0)), t0);
    assert!(events(&effects).contains(&RunEvent::KilometerCrossed { runner: Runner::Partner, kilometer: 3 }));
}

#[test]
fn lead_change_is_debounced() {
    let t0 = Instant::now();
    let mut lc = active(t0);
    lc.record_sample(sample_at(500.0), t0);
    lc.on_message(&bob(), snapshot_with_pace(1, 400.0, 300), t0);
    assert!(events(&lc.tick(t0)).is_empty());

    lc.on_message(&bob(), snapshot_with_pace(2, 600.0, 300), at(t0, 1_000));
    let effects = drive(&mut lc, t0, 1_000, 5_900, 100);
    assert!(!events(&effects).iter().any(|e| matches!(e, RunEvent::LeadChanged { .. })));

    let effects = drive(&mut lc, t0, 6_000, 6_100, 100);
    assert!(events(&effects).contains(&RunEvent::LeadChanged { is_leading: false }));
}

#[test]
fn samples_outside_a_run_are_ignored() {
    let mut lc = lifecycle_with(test_config());
    assert!(lc.record_sample(sample_at(1_500.0), Instant::now()).is_empty());
    assert!(lc.publish(wall_clock()).is_empty());
    assert!(lc.heartbeat(Instant::now(), wall_clock()).is_empty());
}

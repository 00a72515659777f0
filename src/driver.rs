//! Driver spawns and manages the engine tasks
//!
//! Two tasks are spawned per session:
//!
//! - a telemetry reader that owns the [`TelemetryProvider`] and forwards
//!   samples, backing off on provider errors;
//! - the engine loop, the only code that touches [`RunLifecycle`]. Commands,
//!   inbound payloads, samples, timer ticks and reconnect outcomes are all
//!   serialized through one `select!`, so there is exactly one writer.
//!
//! Observers read the results through watch channels (phase, partner
//! display) and a broadcast channel (events).

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{self, WireForm};
use crate::lifecycle::{Effect, RunLifecycle};
use crate::partner::PartnerDisplay;
use crate::provider::TelemetryProvider;
use crate::reconnect::ReconnectState;
use crate::recovery::RecoveryStore;
use crate::transport::Transport;
use crate::types::{
    MessageEnvelope, PartnerProfile, PeerId, RawTelemetrySample, RunEvent, RunId, RunPhase,
    RunRecoveryState,
};
use crate::Result;

const COMMAND_BUFFER: usize = 32;
/// Inbound payloads queued beyond this are dropped at the handle.
pub(crate) const INBOUND_BUFFER: usize = 64;
const SAMPLE_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 128;

/// Reply channel for commands that can be refused.
pub(crate) type Reply = oneshot::Sender<Result<()>>;

/// Requests from a [`crate::RunSession`] handle to the engine loop.
#[derive(Debug)]
pub(crate) enum Command {
    StartRun { run_id: RunId, partner: PartnerProfile, reply: Reply },
    Confirm { reply: Reply },
    Pause { reply: Reply },
    Resume { reply: Reply },
    Finish { reply: Reply },
    Discard { reply: Reply },
    RetryConnection { reply: Reply },
    SetLowBattery(bool),
    SetReducedActivity(bool),
}

/// A payload pushed in by the transport's receive path.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub from: PeerId,
    pub payload: WireForm,
}

#[derive(Debug)]
struct ReconnectOutcome {
    attempt: u32,
    succeeded: bool,
}

/// Result of spawning driver tasks
pub(crate) struct DriverChannels {
    pub commands: mpsc::Sender<Command>,
    pub inbound: mpsc::Sender<Inbound>,
    /// Latest partner display, refreshed on every UI tick
    pub display: watch::Receiver<Option<Arc<PartnerDisplay>>>,
    pub phase: watch::Receiver<RunPhase>,
    pub reconnect: watch::Receiver<Option<ReconnectState>>,
    /// Kept as a sender so handles can subscribe at any time
    pub events: broadcast::Sender<RunEvent>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    pub engine: JoinHandle<()>,
}

/// Driver spawns and manages engine tasks
pub(crate) struct Driver;

impl Driver {
    /// Spawn the telemetry reader and the engine loop
    pub fn spawn<P>(
        lifecycle: RunLifecycle,
        transport: Arc<dyn Transport>,
        store: Box<dyn RecoveryStore>,
        provider: P,
        recovered: Option<RunRecoveryState>,
    ) -> DriverChannels
    where
        P: TelemetryProvider,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_BUFFER);
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let (display_tx, display_rx) = watch::channel(None);
        let (phase_tx, phase_rx) = watch::channel(lifecycle.phase());
        let (reconnect_state_tx, reconnect_state_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let cancel = CancellationToken::new();

        let cancel_reader = cancel.clone();
        tokio::spawn(async move {
            Self::telemetry_reader_task(provider, sample_tx, cancel_reader).await;
        });

        let engine = Engine {
            lifecycle,
            transport,
            store,
            display_tx,
            phase_tx,
            reconnect_state_tx,
            events_tx: events_tx.clone(),
            reconnect_tx,
            reconnect_task: None,
            timers: RunTimers::default(),
            low_battery: false,
            reduced_activity: false,
        };
        let inputs = EngineInputs {
            commands: command_rx,
            inbound: inbound_rx,
            samples: sample_rx,
            reconnects: reconnect_rx,
        };
        let cancel_engine = cancel.clone();
        let engine = tokio::spawn(async move {
            engine.run(inputs, recovered, cancel_engine).await;
        });

        DriverChannels {
            commands: command_tx,
            inbound: inbound_tx,
            display: display_rx,
            phase: phase_rx,
            reconnect: reconnect_state_rx,
            events: events_tx,
            cancel,
            engine,
        }
    }

    /// Telemetry reader task - forwards samples until the source ends
    async fn telemetry_reader_task<P>(
        mut provider: P,
        sample_tx: mpsc::Sender<RawTelemetrySample>,
        cancel: CancellationToken,
    ) where
        P: TelemetryProvider,
    {
        info!("Telemetry reader started ({}Hz)", provider.sample_rate());
        let mut sample_count = 0u64;
        let mut error_count = 0u32;
        const MAX_ERRORS: u32 = 10;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Telemetry reader cancelled");
                    break;
                }
                result = provider.next_sample() => result,
            };

            match result {
                Ok(Some(sample)) => {
                    sample_count += 1;
                    error_count = 0;
                    trace!("Sample {}: distance={}", sample_count, sample.distance_meters);

                    if sample_tx.send(sample).await.is_err() {
                        debug!("Engine dropped, telemetry reader shutting down");
                        break;
                    }
                }
                Ok(None) => {
                    info!("Telemetry source ended after {} samples", sample_count);
                    break;
                }
                Err(e) => {
                    // Transient provider failures must not take the run down
                    error_count += 1;
                    error!("Provider error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many provider errors, telemetry reader stopping");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("Telemetry reader ended (forwarded {} samples)", sample_count);
    }
}

struct EngineInputs {
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Receiver<Inbound>,
    samples: mpsc::Receiver<RawTelemetrySample>,
    reconnects: mpsc::UnboundedReceiver<ReconnectOutcome>,
}

/// Cadence timers; present only while a run exists.
#[derive(Default)]
struct RunTimers {
    publish: Option<Interval>,
    heartbeat: Option<Interval>,
    ui: Option<Interval>,
}

impl RunTimers {
    fn is_running(&self) -> bool {
        self.ui.is_some()
    }
}

fn cadence(period: Duration) -> Interval {
    let now = Instant::now();
    let mut timer = interval_at(now.checked_add(period).unwrap_or(now), period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: Option<&mut Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

struct Engine {
    lifecycle: RunLifecycle,
    transport: Arc<dyn Transport>,
    store: Box<dyn RecoveryStore>,
    display_tx: watch::Sender<Option<Arc<PartnerDisplay>>>,
    phase_tx: watch::Sender<RunPhase>,
    reconnect_state_tx: watch::Sender<Option<ReconnectState>>,
    events_tx: broadcast::Sender<RunEvent>,
    reconnect_tx: mpsc::UnboundedSender<ReconnectOutcome>,
    reconnect_task: Option<JoinHandle<()>>,
    timers: RunTimers,
    low_battery: bool,
    reduced_activity: bool,
}

impl Engine {
    async fn run(mut self, mut inputs: EngineInputs, recovered: Option<RunRecoveryState>, cancel: CancellationToken) {
        info!(peer = %self.lifecycle.local().peer_id, "Engine started");

        if let Some(state) = recovered {
            match self.lifecycle.resume_from_recovery(state, Instant::now(), SystemTime::now()) {
                Ok(effects) => self.apply(effects),
                Err(e) => warn!("Could not resume recovered run: {}", e),
            }
            self.after_step();
        }

        let mut samples_open = true;
        loop {
            let reconnect_at = self.lifecycle.reconnect_deadline();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Engine cancelled");
                    break;
                }
                command = inputs.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All session handles dropped");
                        break;
                    }
                },
                Some(outcome) = inputs.reconnects.recv() => self.handle_reconnect_outcome(outcome),
                // Timers first: a queue backlog never delays a tick.
                _ = next_tick(self.timers.heartbeat.as_mut()) => {
                    let effects = self.lifecycle.heartbeat(Instant::now(), SystemTime::now());
                    self.apply(effects);
                }
                _ = next_tick(self.timers.publish.as_mut()) => {
                    let effects = self.lifecycle.publish(SystemTime::now());
                    self.apply(effects);
                }
                _ = next_tick(self.timers.ui.as_mut()) => {
                    let effects = self.lifecycle.tick(Instant::now());
                    self.apply(effects);
                    self.publish_display();
                }
                _ = deadline(reconnect_at) => {
                    let effects = self.lifecycle.poll_reconnect(Instant::now());
                    self.apply(effects);
                }
                Some(inbound) = inputs.inbound.recv() => self.handle_inbound(inbound),
                sample = inputs.samples.recv(), if samples_open => match sample {
                    Some(sample) => {
                        let effects = self.lifecycle.record_sample(sample, Instant::now());
                        self.apply(effects);
                    }
                    None => samples_open = false,
                },
            }

            self.after_step();
        }

        self.stop_timers();
        info!("Engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::StartRun { run_id, partner, reply } => {
                let result = self.lifecycle.start_run(run_id, partner, now, SystemTime::now());
                self.complete(result, reply);
            }
            Command::Confirm { reply } => {
                let result = self.lifecycle.confirm(now);
                self.complete(result, reply);
            }
            Command::Pause { reply } => {
                let result = self.lifecycle.pause(now);
                self.complete(result, reply);
            }
            Command::Resume { reply } => {
                let result = self.lifecycle.resume(now);
                self.complete(result, reply);
            }
            Command::Finish { reply } => {
                let result = self.lifecycle.finish();
                self.complete(result, reply);
            }
            Command::Discard { reply } => {
                let result = self.lifecycle.discard();
                self.complete(result, reply);
            }
            Command::RetryConnection { reply } => {
                let result = self.lifecycle.retry_connection(now);
                self.complete(result, reply);
            }
            Command::SetLowBattery(low_battery) => {
                if self.low_battery != low_battery {
                    self.low_battery = low_battery;
                    info!(low_battery, "Publish cadence changed");
                    if self.timers.publish.is_some() {
                        let period = self.lifecycle.config().publish_interval_for(low_battery);
                        self.timers.publish = Some(cadence(period));
                    }
                }
            }
            Command::SetReducedActivity(reduced) => {
                if self.reduced_activity != reduced {
                    self.reduced_activity = reduced;
                    info!(reduced, "UI refresh cadence changed");
                    if self.timers.ui.is_some() {
                        let period = self.lifecycle.config().ui_refresh_interval_for(reduced);
                        self.timers.ui = Some(cadence(period));
                    }
                }
            }
        }
    }

    /// Carry out the effects, then answer the caller.
    fn complete(&mut self, result: Result<Vec<Effect>>, reply: Reply) {
        let outcome = result.map(|effects| self.apply(effects));
        if let Err(e) = &outcome {
            debug!("Command refused: {}", e);
        }
        // Observers see the new phase before the caller is answered
        self.after_step();
        let _ = reply.send(outcome);
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        let max = self.lifecycle.config().max_payload_bytes;
        let Some(message) = codec::decode_message(&inbound.payload, max) else {
            return;
        };
        let effects = self.lifecycle.on_message(&inbound.from, message, Instant::now());
        self.apply(effects);
    }

    fn handle_reconnect_outcome(&mut self, outcome: ReconnectOutcome) {
        debug!(attempt = outcome.attempt, succeeded = outcome.succeeded, "Reconnect attempt returned");
        self.reconnect_task = None;
        let effects = self.lifecycle.reconnect_finished(outcome.succeeded, Instant::now(), SystemTime::now());
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, message } => self.send(&to, &message),
                Effect::Emit(event) => {
                    // No subscribers is not an error
                    let _ = self.events_tx.send(event);
                }
                Effect::SaveRecovery(state) => {
                    if let Err(e) = self.store.save(&state) {
                        warn!("Failed to save recovery state: {}", e);
                    }
                }
                Effect::ClearRecovery => {
                    if let Err(e) = self.store.clear() {
                        warn!("Failed to clear recovery state: {}", e);
                    }
                }
                Effect::Reconnect { attempt } => self.spawn_reconnect(attempt),
                Effect::StopTimers => self.stop_timers(),
            }
        }
    }

    fn send(&mut self, to: &PeerId, message: &MessageEnvelope) {
        let wire = match codec::encode_message(message) {
            Ok(wire) => wire,
            Err(e) => {
                warn!("Not sending {}: {}", message.kind(), e);
                return;
            }
        };
        let max = self.lifecycle.config().max_payload_bytes;
        if wire.len() > max {
            warn!(kind = message.kind(), len = wire.len(), max, "Not sending oversized payload");
            return;
        }
        if let Err(e) = self.transport.send(to, wire) {
            debug!(kind = message.kind(), %to, "Send failed: {}", e);
            self.lifecycle.note_send_failure();
        }
    }

    fn spawn_reconnect(&mut self, attempt: u32) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        let transport = Arc::clone(&self.transport);
        let outcome_tx = self.reconnect_tx.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            let result = transport.reconnect().await;
            if let Err(e) = &result {
                debug!(attempt, "Reconnect attempt failed: {}", e);
            }
            let _ = outcome_tx.send(ReconnectOutcome { attempt, succeeded: result.is_ok() });
        }));
    }

    /// Drop cadence timers and abort any reconnect in flight.
    fn stop_timers(&mut self) {
        if self.timers.is_running() {
            debug!("Stopping run timers");
        }
        self.timers = RunTimers::default();
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    /// Start timers for a new run and push observable state.
    fn after_step(&mut self) {
        let phase = self.lifecycle.phase();
        if phase.has_run() && !self.timers.is_running() {
            let config = self.lifecycle.config();
            debug!("Starting run timers");
            self.timers = RunTimers {
                publish: Some(cadence(config.publish_interval_for(self.low_battery))),
                heartbeat: Some(cadence(config.heartbeat_interval)),
                ui: Some(cadence(config.ui_refresh_interval_for(self.reduced_activity))),
            };
        } else if !phase.has_run() && self.timers.is_running() {
            self.stop_timers();
        }

        let phase_changed = self.phase_tx.send_if_modified(|current| {
            if *current != phase {
                *current = phase;
                true
            } else {
                false
            }
        });
        if phase_changed || !phase.has_run() {
            self.publish_display();
        }
        let reconnect = self.lifecycle.reconnect_state();
        self.reconnect_state_tx.send_if_modified(|current| {
            if *current != reconnect {
                *current = reconnect;
                true
            } else {
                false
            }
        });
    }

    fn publish_display(&self) {
        let display = self.lifecycle.display();
        self.display_tx.send_if_modified(|current| {
            if current.as_deref() == display.as_ref() {
                return false;
            }
            *current = display.map(Arc::new);
            true
        });
    }
}

//! Public handle to a running sync engine.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::WireForm;
use crate::config::EngineConfig;
use crate::driver::{Command, Driver, Inbound, Reply};
use crate::lifecycle::RunLifecycle;
use crate::partner::PartnerDisplay;
use crate::provider::TelemetryProvider;
use crate::reconnect::ReconnectState;
use crate::recovery::RecoveryStore;
use crate::stream::ThrottleExt;
use crate::transport::Transport;
use crate::types::{LocalProfile, PartnerProfile, PeerId, RunEvent, RunId, RunPhase, UpdateRate};
use crate::{Result, SyncError};


/// Cloneable entry point for payloads arriving from the peer link.
///
/// Hand one to the transport's receive path. Delivery into the engine is
/// fire-and-forget: payloads beyond a bounded backlog, or sent after the
/// engine stops, are dropped.
#[derive(Debug, Clone)]
pub struct InboundHandle {
    tx: mpsc::Sender<Inbound>,
}

impl InboundHandle {
    /// Queue a payload; returns `false` if it was dropped.
    pub fn receive(&self, from: impl Into<PeerId>, payload: impl Into<WireForm>) -> bool {
        let inbound = Inbound { from: from.into(), payload: payload.into() };
        match self.tx.try_send(inbound) {
            Ok(()) => true,
            Err(TrySendError::Full(inbound)) => {
                warn!(from = %inbound.from, "Inbound backlog full, dropping payload");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Engine stopped, dropping inbound payload");
                false
            }
        }
    }
}

/// A live synchronization engine for one local runner.
///
/// Created with [`RunSession::spawn`]; dropping it stops the engine.
pub struct RunSession {
    local: PeerId,
    commands: mpsc::Sender<Command>,
    inbound: InboundHandle,
    display: watch::Receiver<Option<Arc<PartnerDisplay>>>,
    phase: watch::Receiver<RunPhase>,
    reconnect: watch::Receiver<Option<ReconnectState>>,
    events: broadcast::Sender<RunEvent>,
    ui_refresh_interval: Duration,
    cancel: CancellationToken,
    engine: Option<JoinHandle<()>>,
}

impl RunSession {
    /// Validate `config`, recover any persisted run, and start the engine.
    ///
    /// Must be called from within a Tokio runtime. If `store` holds a run
    /// from before a crash, the engine resumes it straight into
    /// [`RunPhase::Active`].
    pub fn spawn<T, S, P>(
        config: EngineConfig,
        local: LocalProfile,
        transport: T,
        mut store: S,
        provider: P,
    ) -> Result<Self>
    where
        T: Transport,
        S: RecoveryStore,
        P: TelemetryProvider,
    {
        config.validate()?;
        if !local.peer_id.is_valid() {
            return Err(SyncError::config("local.peer_id", "must be non-empty and bounded"));
        }

        let recovered = match store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Discarding unreadable recovery state: {}", e);
                if let Err(e) = store.clear() {
                    warn!("Failed to clear recovery state: {}", e);
                }
                None
            }
        };
        if let Some(state) = &recovered {
            info!(run = %state.run_id, partner = %state.partner_id, "Found recoverable run");
        }

        let ui_refresh_interval = config.ui_refresh_interval;
        let peer = local.peer_id.clone();
        let lifecycle = RunLifecycle::new(config, local);
        let channels = Driver::spawn(lifecycle, Arc::new(transport), Box::new(store), provider, recovered);
        info!(%peer, "Run session started");

        Ok(Self {
            local: peer,
            commands: channels.commands,
            inbound: InboundHandle { tx: channels.inbound },
            display: channels.display,
            phase: channels.phase,
            reconnect: channels.reconnect,
            events: channels.events,
            ui_refresh_interval,
            cancel: channels.cancel,
            engine: Some(channels.engine),
        })
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }

    /// Invite `partner` to a new run.
    pub async fn start_run(&self, run_id: impl Into<RunId>, partner: PartnerProfile) -> Result<()> {
        let run_id = run_id.into();
        self.request(|reply| Command::StartRun { run_id, partner, reply }).await
    }

    /// Accept the pending invitation.
    pub async fn confirm(&self) -> Result<()> {
        self.request(|reply| Command::Confirm { reply }).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Complete the run and tell the partner the final numbers.
    pub async fn finish(&self) -> Result<()> {
        self.request(|reply| Command::Finish { reply }).await
    }

    /// Abandon the run.
    pub async fn discard(&self) -> Result<()> {
        self.request(|reply| Command::Discard { reply }).await
    }

    /// Restart reconnection after it was exhausted without ending the run.
    pub async fn retry_connection(&self) -> Result<()> {
        self.request(|reply| Command::RetryConnection { reply }).await
    }

    /// Lengthen the publish interval to save power.
    pub async fn set_low_battery(&self, low_battery: bool) -> Result<()> {
        self.notify(Command::SetLowBattery(low_battery)).await
    }

    /// Lengthen the UI refresh interval while the display is not visible.
    pub async fn set_reduced_activity(&self, reduced: bool) -> Result<()> {
        self.notify(Command::SetReducedActivity(reduced)).await
    }

    /// Push a payload received from the peer link.
    pub fn receive(&self, from: impl Into<PeerId>, payload: impl Into<WireForm>) -> bool {
        self.inbound.receive(from, payload)
    }

    /// A handle the transport can keep for its receive path.
    pub fn inbound_handle(&self) -> InboundHandle {
        self.inbound.clone()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Reconnection progress, if a run exists.
    ///
    /// [`ReconnectState::Exhausted`] means the run is waiting for
    /// [`RunSession::retry_connection`].
    pub fn reconnect_state(&self) -> Option<ReconnectState> {
        *self.reconnect.borrow()
    }

    /// Latest partner display, if a run exists.
    pub fn partner(&self) -> Option<Arc<PartnerDisplay>> {
        self.display.borrow().clone()
    }

    /// Domain events from the moment of subscription.
    pub fn events(&self) -> BoxStream<'static, RunEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event subscriber lagged");
                        None
                    }
                }
            })
            .boxed()
    }

    /// Phase changes, starting with the current phase.
    pub fn phase_updates(&self) -> impl Stream<Item = RunPhase> + Send + Unpin + 'static {
        WatchStream::new(self.phase.clone())
    }

    /// Partner display updates at most at `rate`.
    pub fn partner_updates(&self, rate: UpdateRate) -> BoxStream<'static, Arc<PartnerDisplay>> {
        let updates = WatchStream::new(self.display.clone()).filter_map(|display| async move { display });
        match rate.throttle_interval(self.ui_refresh_interval) {
            None => updates.boxed(),
            Some(period) => updates.throttle(period).boxed(),
        }
    }

    /// Wait until the run reaches `target`.
    pub async fn wait_for_phase(&self, target: RunPhase, timeout: Duration) -> Result<()> {
        let mut phase = self.phase.clone();
        match tokio::time::timeout(timeout, phase.wait_for(|p| *p == target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SyncError::EngineStopped),
            Err(_) => Err(SyncError::Timeout { duration: timeout }),
        }
    }

    /// Signal the engine to stop without waiting for it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the engine and wait for its tasks to wind down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.notify(command(reply)).await?;
        response.await.map_err(|_| SyncError::EngineStopped)?
    }

    async fn notify(&self, command: Command) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::EngineStopped);
        }
        self.commands.send(command).await.map_err(|_| SyncError::EngineStopped)
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        debug!("Dropping run session");
        // Cancel tasks on drop for clean shutdown
        self.cancel.cancel();
    }
}

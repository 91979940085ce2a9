//! SessionSupervisor: keeps at most one session worker alive.
//!
//! # How hotplug events map to workers (for beginners)
//!
//! The hotplug source reports every HID interface that appears or
//! disappears.  The supervisor only cares about the one whose
//! [`DeviceIdentity`] equals the configured target:
//!
//! | Event                  | Tracked worker | Action                                   |
//! |------------------------|----------------|------------------------------------------|
//! | `Attached(target, h)`  | none           | start a worker on a new session over `h` |
//! | `Attached(target, h)`  | some           | stop + close the old one, then start     |
//! | `Detached(target)`     | some           | stop, close, clear the slot              |
//! | `Failure(_)`           | any            | log only                                 |
//! | anything else          | any            | ignored                                  |
//!
//! The tracked worker lives in a single slot behind one async mutex.  Every
//! handler and [`SessionSupervisor::shutdown`] holds that mutex for its whole
//! duration, so they never interleave.
//!
//! # Shutdown
//!
//! `shutdown` stops the tracked worker and then waits for every worker task
//! to finish, up to `shutdown_timeout`.  Tasks still running after that are
//! abandoned.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use qmk_display_core::DeviceIdentity;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::application::device_session::{DeviceSession, RawTransport};
use crate::application::session_worker::{SessionWorker, WorkerConfig, WorkerHandle};
use crate::application::telemetry::SharedTelemetry;

// ── Hotplug seam ──────────────────────────────────────────────────────────────

/// A device notification delivered by a [`HotplugSource`].
pub enum HotplugEvent {
    /// A device appeared.  The transport is unopened.
    Attached(DeviceIdentity, Arc<dyn RawTransport>),
    Detached(DeviceIdentity),
    /// The source could not observe devices (e.g. enumeration failed).
    Failure(DeviceIdentity),
}

impl fmt::Debug for HotplugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotplugEvent::Attached(id, _) => f.debug_tuple("Attached").field(id).finish(),
            HotplugEvent::Detached(id) => f.debug_tuple("Detached").field(id).finish(),
            HotplugEvent::Failure(id) => f.debug_tuple("Failure").field(id).finish(),
        }
    }
}

/// Error type for hotplug sources.
#[derive(Debug, Error)]
pub enum HotplugError {
    #[error("failed to initialise HID library: {0}")]
    Init(String),
    #[error("failed to spawn hotplug thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("hotplug source already started")]
    AlreadyStarted,
}

/// Source of attach/detach notifications.
pub trait HotplugSource {
    /// Starts delivering events on `events`.
    ///
    /// # Errors
    ///
    /// Returns [`HotplugError`] if the source cannot observe devices at all.
    fn start(&mut self, events: mpsc::Sender<HotplugEvent>) -> Result<(), HotplugError>;

    /// Stops delivering events.  The sender is dropped once the source winds
    /// down, which ends [`SessionSupervisor::run`].
    fn stop(&mut self);
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Configuration for a [`SessionSupervisor`].
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub target: DeviceIdentity,
    pub worker: WorkerConfig,
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            target: DeviceIdentity::default(),
            worker: WorkerConfig::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

struct ActiveSession {
    identity: DeviceIdentity,
    worker: WorkerHandle,
}

#[derive(Default)]
struct SupervisorState {
    active: Option<ActiveSession>,
    tasks: JoinSet<()>,
    shut_down: bool,
}

/// Owns the tracked worker slot and all worker tasks.
pub struct SessionSupervisor {
    config: SupervisorConfig,
    telemetry: SharedTelemetry,
    state: Mutex<SupervisorState>,
}

impl SessionSupervisor {
    pub fn new(config: SupervisorConfig, telemetry: SharedTelemetry) -> Self {
        Self {
            config,
            telemetry,
            state: Mutex::new(SupervisorState::default()),
        }
    }

    pub fn target(&self) -> DeviceIdentity {
        self.config.target
    }

    /// Consumes events until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<HotplugEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("hotplug event channel closed");
    }

    pub async fn handle_event(&self, event: HotplugEvent) {
        match event {
            HotplugEvent::Attached(identity, transport) => self.on_attach(identity, transport).await,
            HotplugEvent::Detached(identity) => self.on_detach(identity).await,
            HotplugEvent::Failure(identity) => self.on_failure(identity).await,
        }
    }

    /// Starts a worker for the target device, replacing any tracked one.
    pub async fn on_attach(&self, identity: DeviceIdentity, transport: Arc<dyn RawTransport>) {
        if identity != self.config.target {
            trace!(device = %identity, "ignoring attach of non-target device");
            return;
        }

        let mut state = self.state.lock().await;
        reap_finished(&mut state.tasks);
        if state.shut_down {
            warn!(device = %identity, "ignoring attach after shutdown");
            return;
        }

        if let Some(stale) = state.active.take() {
            info!(device = %stale.identity, "device re-attached; replacing stale session");
            retire(stale).await;
        }

        let session = Arc::new(DeviceSession::new(identity, transport));
        let span = info_span!("session", session_id = %session.id(), device = %identity);
        let worker = SessionWorker::new(session, Arc::clone(&self.telemetry), self.config.worker.clone());
        let handle = worker.handle();
        state.tasks.spawn(worker.run().instrument(span));
        state.active = Some(ActiveSession {
            identity,
            worker: handle,
        });
        info!(device = %identity, "keyboard attached; session started");
    }

    /// Stops and closes the tracked worker if it belongs to `identity`.
    pub async fn on_detach(&self, identity: DeviceIdentity) {
        let mut state = self.state.lock().await;
        reap_finished(&mut state.tasks);

        let matches = state
            .active
            .as_ref()
            .is_some_and(|active| active.identity == identity);
        if !matches {
            trace!(device = %identity, "ignoring detach of untracked device");
            return;
        }
        if let Some(active) = state.active.take() {
            retire(active).await;
            info!(device = %identity, "keyboard detached; session stopped");
        }
    }

    pub async fn on_failure(&self, identity: DeviceIdentity) {
        let _state = self.state.lock().await;
        warn!(device = %identity, "hotplug source reported a failure");
    }

    /// Identity of the tracked session, if any.
    pub async fn active_identity(&self) -> Option<DeviceIdentity> {
        self.state.lock().await.active.as_ref().map(|a| a.identity)
    }

    /// Number of worker tasks that have not finished yet.
    pub async fn running_workers(&self) -> usize {
        let mut state = self.state.lock().await;
        reap_finished(&mut state.tasks);
        state.tasks.len()
    }

    /// Stops the tracked worker and waits, up to the shutdown timeout, for
    /// all worker tasks to finish.  Later attaches are ignored.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shut_down = true;
        let active = state.active.take();
        let deadline = self.config.shutdown_timeout;

        let drained = tokio::time::timeout(deadline, async {
            if let Some(active) = active {
                retire(active).await;
            }
            drain(&mut state.tasks).await;
        })
        .await;

        match drained {
            Ok(()) => info!("all session workers stopped"),
            Err(_) => {
                warn!(
                    remaining = state.tasks.len(),
                    timeout_ms = deadline.as_millis() as u64,
                    "session workers did not stop in time; abandoning them"
                );
                state.tasks.detach_all();
            }
        }
    }
}

/// Stops a worker (sending `StopCommunication` if possible) and closes its
/// session.
async fn retire(active: ActiveSession) {
    active.worker.stop().await;
    active.worker.session().close().await;
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        log_join_result(result);
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        log_join_result(result);
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "session worker panicked");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! SessionWorker: the background task that feeds one keyboard.
//!
//! # Lifecycle
//!
//! ```text
//!            ┌───────────── failure backoff (2s) ◄──────────────┐
//!            ▼                                                  │
//! Starting ──► Handshaking ──► Streaming ──(every 1s)──┐        │
//!  open if      send Version     sample + send         │        │
//!  not open     wait settle 2s   HardwareState ◄───────┘        │
//!     │                              │                          │
//!     └── open failed ───────────────┴── telemetry failed ──────┘
//!
//! stop() from any state ──► Stopped
//! ```
//!
//! A failed send is logged and the loop carries on: each telemetry sample is
//! independent, and a missed one is replaced a second later.  Anything that
//! prevents the loop itself from running (the device refusing to open, the
//! metrics source failing) restarts the whole procedure after the failure
//! backoff.
//!
//! The exception is a handle that keeps failing at the transport level.  A
//! keyboard replugged under the same path within one hotplug poll produces
//! no attach/detach pair, so the old handle simply stops working.  After
//! [`LINK_LOSS_THRESHOLD`] such failures in a row the worker releases the
//! handle and restarts the procedure, which reopens the device.
//!
//! # Cancellation
//!
//! The worker owns a [`CancellationToken`].  Every sleep races against it, so
//! [`WorkerHandle::stop`] interrupts the settle delay and the refresh
//! interval immediately.  An in-flight send is not interrupted; it is bounded
//! by the read timeout instead.

use std::sync::Arc;
use std::time::Duration;

use qmk_display_core::{HostVersion, Message, Response, ResponseError};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::device_session::DeviceSession;
use crate::application::telemetry::{sample, SharedTelemetry, TelemetryError};

/// Consecutive transport-level send failures after which the handle is
/// treated as stale and reopened.
pub const LINK_LOSS_THRESHOLD: u32 = 3;

/// Version used when the crate version cannot be expressed as three bytes.
const FALLBACK_HOST_VERSION: HostVersion = HostVersion::new(1, 1, 0);

/// The version this host announces in its `Version` packet.
pub fn host_version() -> HostVersion {
    env!("CARGO_PKG_VERSION")
        .parse()
        .unwrap_or(FALLBACK_HOST_VERSION)
}

/// Timing and handshake parameters for a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub host_version: HostVersion,
    /// Interval between two `HardwareState` packets.
    pub refresh_interval: Duration,
    /// Delay between the `Version` packet and the first `HardwareState`.
    pub settle_delay: Duration,
    /// Delay before the whole procedure is retried after a failure.
    pub failure_backoff: Duration,
    /// How long each send waits for the keyboard's echo.
    pub read_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host_version: host_version(),
            refresh_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            failure_backoff: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Where a worker currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Handshaking,
    Streaming,
    Stopped,
}

/// Failures that end one attempt and trigger the outer retry.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("device refused to open")]
    OpenRefused,

    #[error("failed to open device: {0}")]
    Open(#[source] ResponseError),

    #[error("telemetry sampling failed: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("device handle lost after {failures} failed sends")]
    LinkLost { failures: u32 },
}

/// The worker task body.  Consumed by [`SessionWorker::run`].
pub struct SessionWorker {
    session: Arc<DeviceSession>,
    telemetry: SharedTelemetry,
    config: WorkerConfig,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
}

/// Control handle for a running worker.  Cheap to clone.
#[derive(Clone)]
pub struct WorkerHandle {
    session: Arc<DeviceSession>,
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    read_timeout: Duration,
}

impl SessionWorker {
    pub fn new(session: Arc<DeviceSession>, telemetry: SharedTelemetry, config: WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            session,
            telemetry,
            config,
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            session: Arc::clone(&self.session),
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
            read_timeout: self.config.read_timeout,
        }
    }

    /// Runs the procedure, retrying after each failure, until stopped.
    pub async fn run(self) {
        while !self.cancel.is_cancelled() {
            match self.run_once().await {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.config.failure_backoff.as_millis() as u64,
                        "session procedure failed; retrying"
                    );
                    if !self.pause(self.config.failure_backoff).await {
                        break;
                    }
                }
            }
        }
        self.state.send_replace(WorkerState::Stopped);
        debug!("session worker finished");
    }

    /// One pass through Starting → Handshaking → Streaming.
    ///
    /// Returns `Ok(())` only when stopped.
    async fn run_once(&self) -> Result<(), WorkerError> {
        self.state.send_replace(WorkerState::Starting);
        if !self.session.is_open() {
            match self.session.open().await {
                Ok(true) => info!(device = %self.session.identity(), "device opened"),
                Ok(false) => return Err(WorkerError::OpenRefused),
                Err(e) => return Err(WorkerError::Open(e)),
            }
        }

        self.state.send_replace(WorkerState::Handshaking);
        let version = Message::Version(self.config.host_version);
        match self.session.send(&version, self.config.read_timeout).await {
            Response::Acknowledge(_) => {
                info!(version = %self.config.host_version, "host version acknowledged")
            }
            Response::Error(e) => warn!(error = %e, "version handshake not acknowledged"),
        }
        if !self.pause(self.config.settle_delay).await {
            return Ok(());
        }

        self.state.send_replace(WorkerState::Streaming);
        let mut io_failures = 0;
        while !self.cancel.is_cancelled() {
            let hardware = sample(&self.telemetry)?;
            match self
                .session
                .send(&Message::HardwareState(hardware), self.config.read_timeout)
                .await
            {
                Response::Acknowledge(_) => {
                    io_failures = 0;
                    debug!(
                        cpu = hardware.cpu_usage.get(),
                        ram = hardware.ram_usage.get(),
                        "hardware state sent"
                    )
                }
                Response::Error(ResponseError::SessionFinished) => break,
                Response::Error(e) => {
                    warn!(error = %e, "hardware state not acknowledged");
                    debug!(error = ?e, "hardware state failure detail");
                    if is_link_failure(&e) {
                        io_failures += 1;
                    } else {
                        io_failures = 0;
                    }
                    if io_failures >= LINK_LOSS_THRESHOLD {
                        self.session.reset().await;
                        return Err(WorkerError::LinkLost {
                            failures: io_failures,
                        });
                    }
                }
            }
            if !self.pause(self.config.refresh_interval).await {
                break;
            }
        }
        Ok(())
    }

    /// Sleeps for `duration`.  Returns `false` if stopped first.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// `true` for failures that mean the handle itself is unusable, as opposed
/// to the keyboard answering with a bad echo.
fn is_link_failure(error: &ResponseError) -> bool {
    matches!(
        error,
        ResponseError::Transport { .. } | ResponseError::WriteFailed { .. }
    )
}

impl WorkerHandle {
    /// Stops the worker and sends `StopCommunication` if the device is open.
    ///
    /// Waits for any in-flight send, so the stop packet is always the last
    /// one the session writes.  The wait is bounded: if the session stays
    /// busy past one in-flight exchange plus the stop packet's own exchange,
    /// the stop packet is skipped.  Safe to call repeatedly and from any
    /// task; only the first call writes anything.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let bound = self.read_timeout.saturating_mul(3);
        let final_send = self
            .session
            .send_final(&Message::StopCommunication, self.read_timeout);

        match tokio::time::timeout(bound, final_send).await {
            Ok(Response::Acknowledge(_)) => {
                info!(session_id = %self.session.id(), "communication stopped")
            }
            Ok(Response::Error(ResponseError::SessionFinished | ResponseError::SessionClosed)) => {}
            Ok(Response::Error(e)) => {
                debug!(session_id = %self.session.id(), error = %e, "stop packet not delivered")
            }
            Err(_) => warn!(
                session_id = %self.session.id(),
                "session busy; gave up sending stop packet"
            ),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

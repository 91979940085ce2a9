//! Integration tests for the session supervisor.
//!
//! These tests drive the supervisor the way `main` does: a hotplug source
//! feeds events into `SessionSupervisor::run`, and mock transports record
//! what each attached "keyboard" received.

use std::sync::Arc;
use std::time::Duration;

use qmk_display::application::session_worker::WorkerConfig;
use qmk_display::application::supervisor::{
    HotplugError, HotplugEvent, HotplugSource, SessionSupervisor, SupervisorConfig,
};
use qmk_display::application::telemetry::{self, TelemetryError, TelemetrySource};
use qmk_display::infrastructure::hotplug::mock::MockHotplugSource;
use qmk_display::infrastructure::transport::mock::MockTransport;
use qmk_display_core::{DeviceIdentity, HostVersion};
use tokio::sync::mpsc;

struct FixedTelemetry;

impl TelemetrySource for FixedTelemetry {
    fn cpu_usage_percent(&mut self) -> Result<f64, TelemetryError> {
        Ok(42.0)
    }

    fn ram_usage_percent(&mut self) -> Result<f64, TelemetryError> {
        Ok(67.0)
    }
}

fn target() -> DeviceIdentity {
    DeviceIdentity::default()
}

fn other_device() -> DeviceIdentity {
    DeviceIdentity::new(0x0001, 0x0002, 0x0003)
}

fn supervisor() -> Arc<SessionSupervisor> {
    let config = SupervisorConfig {
        target: target(),
        worker: WorkerConfig {
            host_version: HostVersion::new(1, 1, 0),
            ..WorkerConfig::default()
        },
        shutdown_timeout: Duration::from_secs(10),
    };
    Arc::new(SessionSupervisor::new(config, telemetry::shared(FixedTelemetry)))
}

/// Lets stopped worker tasks run to completion on the paused clock.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn assert_single_worker_invariant(sup: &SessionSupervisor, expect_active: bool) {
    let running = sup.running_workers().await;
    let active = sup.active_identity().await;
    assert!(running <= 1, "{running} workers running");
    assert_eq!(active.is_some(), expect_active);
    assert_eq!(running == 1, expect_active);
}

#[tokio::test(start_paused = true)]
async fn test_attach_then_detach_through_hotplug_source() {
    // Arrange
    let sup = supervisor();
    let mut source = MockHotplugSource::new();
    let (tx, rx) = mpsc::channel(16);
    source.start(tx).unwrap();
    let event_loop = {
        let sup = Arc::clone(&sup);
        tokio::spawn(async move { sup.run(rx).await })
    };
    let keyboard = Arc::new(MockTransport::new());

    // Act
    assert!(source.emit(HotplugEvent::Attached(target(), keyboard.clone())).await);
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert!(source.emit(HotplugEvent::Detached(target())).await);
    settle().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    source.stop();
    event_loop.await.unwrap();

    // Assert: Version, HardwareState at 2, 3, 4s, Stop, and nothing after.
    assert_eq!(keyboard.opcodes(), vec![0x01, 0x02, 0x02, 0x02, 0x03]);
    assert_eq!(&keyboard.packets()[1][..3], &[0x02, 42, 67]);
    assert_eq!(keyboard.close_calls(), 1);
    assert_single_worker_invariant(&sup, false).await;
}

#[tokio::test(start_paused = true)]
async fn test_single_worker_invariant_across_event_sequence() {
    let sup = supervisor();
    let first = Arc::new(MockTransport::new());
    let second = Arc::new(MockTransport::new());
    let stranger = Arc::new(MockTransport::new());

    // attach(target)
    sup.on_attach(target(), first.clone()).await;
    settle().await;
    assert_single_worker_invariant(&sup, true).await;

    // attach(other) is ignored
    sup.on_attach(other_device(), stranger.clone()).await;
    settle().await;
    assert_single_worker_invariant(&sup, true).await;

    // failure(target) is only logged
    sup.on_failure(target()).await;
    settle().await;
    assert_single_worker_invariant(&sup, true).await;

    // duplicate attach(target) replaces the worker
    tokio::time::sleep(Duration::from_millis(2500)).await;
    sup.on_attach(target(), second.clone()).await;
    settle().await;
    assert_single_worker_invariant(&sup, true).await;

    // detach(other) is a no-op
    sup.on_detach(other_device()).await;
    settle().await;
    assert_single_worker_invariant(&sup, true).await;

    // detach(target) clears the slot
    sup.on_detach(target()).await;
    settle().await;
    assert_single_worker_invariant(&sup, false).await;

    // a second detach is a no-op
    sup.on_detach(target()).await;
    settle().await;
    assert_single_worker_invariant(&sup, false).await;

    // The stale session ended with Stop and was closed before the new one began.
    assert_eq!(first.opcodes(), vec![0x01, 0x02, 0x03]);
    assert_eq!(first.close_calls(), 1);
    assert_eq!(second.opcodes(), vec![0x01, 0x03]);
    assert_eq!(second.close_calls(), 1);
    assert!(stranger.packets().is_empty());
    assert_eq!(stranger.open_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_detach_of_never_opened_device_sends_nothing() {
    let sup = supervisor();
    let keyboard = Arc::new(MockTransport::new());
    keyboard.set_accept_open(false);

    sup.on_attach(target(), keyboard.clone()).await;
    tokio::time::sleep(Duration::from_millis(4500)).await;
    sup.on_detach(target()).await;
    settle().await;

    assert_eq!(keyboard.open_calls(), 3);
    assert!(keyboard.packets().is_empty());
    assert_single_worker_invariant(&sup, false).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_active_worker() {
    let sup = supervisor();
    let keyboard = Arc::new(MockTransport::new());
    sup.on_attach(target(), keyboard.clone()).await;
    tokio::time::sleep(Duration::from_millis(3500)).await;

    sup.shutdown().await;

    assert_eq!(keyboard.opcodes(), vec![0x01, 0x02, 0x02, 0x03]);
    assert_eq!(keyboard.close_calls(), 1);
    assert_single_worker_invariant(&sup, false).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_bounded_by_timeout() {
    // Arrange: a keyboard whose writes hang far longer than the shutdown budget.
    let sup = supervisor();
    let keyboard = Arc::new(MockTransport::new());
    keyboard.set_write_delay(Duration::from_secs(60));
    sup.on_attach(target(), keyboard.clone()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Act
    let started = tokio::time::Instant::now();
    sup.shutdown().await;
    let elapsed = started.elapsed();

    // Assert: the stuck worker is abandoned after the 10s budget.
    assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(11), "elapsed {elapsed:?}");
    assert_eq!(sup.active_identity().await, None);
    assert_eq!(sup.running_workers().await, 0);
}

#[tokio::test]
async fn test_mock_hotplug_source_rejects_double_start_and_failure() {
    let mut source = MockHotplugSource::new();
    let (tx, _rx) = mpsc::channel(1);
    source.start(tx.clone()).unwrap();
    assert!(matches!(source.start(tx), Err(HotplugError::AlreadyStarted)));
    source.stop();
    assert!(!source.is_started());

    let mut failing = MockHotplugSource::failing();
    let (tx, _rx) = mpsc::channel(1);
    assert!(matches!(failing.start(tx), Err(HotplugError::Init(_))));
}

//! Polling HID hotplug source.
//!
//! hidapi has no portable attach/detach callbacks, so this source polls the
//! device enumeration at a fixed interval and diffs each snapshot against the
//! previous one:
//!
//! - a path present now but not before → `Attached(identity, transport)`
//! - a path present before but not now → `Detached(identity)`
//!
//! Detaches are emitted before attaches, so a keyboard that re-enumerates
//! under a new path within one poll is seen as "gone, then back".
//!
//! The poll loop runs on a dedicated thread (hidapi calls block) and stops
//! when the `running` flag is cleared or the receiver is dropped.  An
//! enumeration error emits `Failure(target)`, keeps the previous snapshot and
//! the loop keeps polling.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use hidapi::{DeviceInfo, HidError};
use qmk_display_core::DeviceIdentity;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::application::supervisor::{HotplugError, HotplugEvent, HotplugSource};
use crate::infrastructure::transport::hid::{lock, HidTransport, SharedHidApi};

type Snapshot = HashMap<CString, DeviceIdentity>;

/// One difference between two enumeration passes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Removed(CString, DeviceIdentity),
    Added(CString, DeviceIdentity),
    EnumerationFailed,
}

/// Hotplug source backed by periodic hidapi enumeration.
pub struct HidHotplugSource {
    target: DeviceIdentity,
    poll_interval: Duration,
    api: SharedHidApi,
    running: Arc<AtomicBool>,
}

impl HidHotplugSource {
    pub fn new(target: DeviceIdentity, poll_interval: Duration, api: SharedHidApi) -> Self {
        Self {
            target,
            poll_interval,
            api,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl HotplugSource for HidHotplugSource {
    fn start(&mut self, events: mpsc::Sender<HotplugEvent>) -> Result<(), HotplugError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotplugError::AlreadyStarted);
        }

        let poller = Poller {
            api: Arc::clone(&self.api),
            target: self.target,
            poll_interval: self.poll_interval,
            running: Arc::clone(&self.running),
            events,
        };
        let spawned = std::thread::Builder::new()
            .name("qmk-hotplug".to_string())
            .spawn(move || poller.run());
        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(HotplugError::Spawn(e));
        }

        info!(
            device = %self.target,
            poll_ms = self.poll_interval.as_millis() as u64,
            "HID hotplug monitor started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("HID hotplug monitor stopping");
        }
    }
}

struct Poller {
    api: SharedHidApi,
    target: DeviceIdentity,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    events: mpsc::Sender<HotplugEvent>,
}

impl Poller {
    fn run(self) {
        let mut known = Snapshot::new();

        while self.running.load(Ordering::Relaxed) {
            let changes = poll_changes(&mut known, self.enumerate());
            if !self.emit(changes) {
                debug!("hotplug receiver dropped; stopping poll loop");
                break;
            }
            std::thread::sleep(self.poll_interval);
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn enumerate(&self) -> Result<Snapshot, HidError> {
        let mut api = lock(&self.api);
        api.refresh_devices()?;
        Ok(snapshot(api.device_list()))
    }

    /// Returns `false` once the receiver is gone.
    fn emit(&self, changes: Vec<Change>) -> bool {
        for change in changes {
            let event = match change {
                Change::Removed(path, identity) => {
                    trace!(device = %identity, path = ?path, "HID device removed");
                    HotplugEvent::Detached(identity)
                }
                Change::Added(path, identity) => {
                    trace!(device = %identity, path = ?path, "HID device added");
                    let transport = HidTransport::new(path, Arc::clone(&self.api));
                    HotplugEvent::Attached(identity, Arc::new(transport))
                }
                Change::EnumerationFailed => HotplugEvent::Failure(self.target),
            };
            if self.events.blocking_send(event).is_err() {
                return false;
            }
        }
        true
    }
}

/// Folds one enumeration result into `known` and returns what changed.
///
/// Removals come first, then additions, each sorted by path.  A failed
/// enumeration leaves `known` untouched.
fn poll_changes(known: &mut Snapshot, enumerated: Result<Snapshot, HidError>) -> Vec<Change> {
    let current = match enumerated {
        Ok(current) => current,
        Err(e) => {
            warn!(error = %e, "HID enumeration failed");
            return vec![Change::EnumerationFailed];
        }
    };

    let mut removed: Vec<_> = known
        .iter()
        .filter(|(path, _)| !current.contains_key(*path))
        .map(|(path, identity)| (path.clone(), *identity))
        .collect();
    let mut added: Vec<_> = current
        .iter()
        .filter(|(path, _)| !known.contains_key(*path))
        .map(|(path, identity)| (path.clone(), *identity))
        .collect();
    removed.sort_by(|a, b| a.0.cmp(&b.0));
    added.sort_by(|a, b| a.0.cmp(&b.0));

    *known = current;
    removed
        .into_iter()
        .map(|(path, identity)| Change::Removed(path, identity))
        .chain(added.into_iter().map(|(path, identity)| Change::Added(path, identity)))
        .collect()
}

fn identity_of(info: &DeviceInfo) -> DeviceIdentity {
    DeviceIdentity::new(info.product_id(), info.vendor_id(), info.usage())
}

fn snapshot<'a>(devices: impl Iterator<Item = &'a DeviceInfo>) -> Snapshot {
    devices
        .map(|info| (info.path().to_owned(), identity_of(info)))
        .collect()
}

//! hidapi-backed raw HID transport.
//!
//! hidapi calls are blocking, so every call runs on Tokio's blocking pool via
//! [`tokio::task::spawn_blocking`].  The open device lives behind a
//! `std::sync::Mutex` that is only ever locked inside those blocking closures.
//!
//! The transport is created from the device *path* reported by enumeration
//! and opens lazily; the session decides when to open it.  It opens through
//! the same [`SharedHidApi`] context the hotplug poller enumerates with, so
//! the process only ever holds one hidapi context.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use hidapi::{HidApi, HidDevice};
use qmk_display_core::protocol::messages::Packet;
use tracing::{debug, warn};

use crate::application::device_session::{RawTransport, TransportError};

/// One hidapi context shared by the hotplug poller and every transport.
pub type SharedHidApi = Arc<Mutex<HidApi>>;

/// Creates the process-wide hidapi context.
///
/// # Errors
///
/// Returns the hidapi error if the library cannot be initialised.
pub fn shared_api() -> Result<SharedHidApi, hidapi::HidError> {
    Ok(Arc::new(Mutex::new(HidApi::new()?)))
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type DeviceSlot = Arc<Mutex<Option<HidDevice>>>;

/// Raw HID transport for one enumerated interface.
pub struct HidTransport {
    path: CString,
    api: SharedHidApi,
    device: DeviceSlot,
    /// Only written while the device slot is locked, so it always agrees
    /// with the slot.
    open: Arc<AtomicBool>,
}

impl HidTransport {
    pub fn new(path: CString, api: SharedHidApi) -> Self {
        Self {
            path,
            api,
            device: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &CString {
        &self.path
    }

    /// Runs `f` against the open device on the blocking pool.
    async fn with_device<T, F>(&self, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&HidDevice) -> Result<T, TransportError> + Send + 'static,
    {
        let slot = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || match lock(&slot).as_ref() {
            Some(device) => f(device),
            None => Err(TransportError::NotOpen),
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

fn hid_error(e: hidapi::HidError) -> TransportError {
    TransportError::Hid(e.to_string())
}

/// hidapi takes the read timeout as signed milliseconds.
fn timeout_millis(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}

#[async_trait]
impl RawTransport for HidTransport {
    async fn open(&self) -> Result<bool, TransportError> {
        let slot = Arc::clone(&self.device);
        let api = Arc::clone(&self.api);
        let open = Arc::clone(&self.open);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut device = lock(&slot);
            if device.is_none() {
                match lock(&api).open_path(&path) {
                    Ok(opened) => *device = Some(opened),
                    Err(e) => warn!(path = ?path, error = %e, "failed to open HID device"),
                }
            }
            let opened = device.is_some();
            open.store(opened, Ordering::SeqCst);
            opened
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))
    }

    async fn close(&self) {
        let slot = Arc::clone(&self.device);
        let open = Arc::clone(&self.open);
        let result = tokio::task::spawn_blocking(move || {
            let mut device = lock(&slot);
            // Dropping the HidDevice closes the OS handle.
            device.take();
            open.store(false, Ordering::SeqCst);
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to close HID device");
        }
        debug!(path = ?self.path, "HID device closed");
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn write(&self, packet: &Packet, report_id: u8) -> Result<i32, TransportError> {
        let mut report = Vec::with_capacity(packet.len() + 1);
        report.push(report_id);
        report.extend_from_slice(packet);

        self.with_device(move |device| {
            let written = device.write(&report).map_err(hid_error)?;
            Ok(i32::try_from(written).unwrap_or(i32::MAX))
        })
        .await
    }

    async fn read(&self, size: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let millis = timeout_millis(timeout);
        self.with_device(move |device| {
            let mut buf = vec![0u8; size];
            let read = device.read_timeout(&mut buf, millis).map_err(hid_error)?;
            buf.truncate(read);
            Ok(buf)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_device(api: SharedHidApi) -> HidTransport {
        HidTransport::new(CString::new("/dev/hidraw-missing-keyboard").unwrap(), api)
    }

    #[test]
    fn test_timeout_millis_saturates() {
        assert_eq!(timeout_millis(Duration::from_millis(1000)), 1000);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX / 2)), i32::MAX);
    }

    #[test]
    fn test_lock_recovers_from_poisoned_mutex() {
        let mutex = Arc::new(Mutex::new(7));
        let poisoner = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 7);
    }

    #[tokio::test]
    async fn test_unopened_transport_refuses_io() {
        let transport = missing_device(shared_api().expect("hidapi init"));

        assert!(!transport.is_open());
        assert!(matches!(
            transport.write(&[0u8; 32], 0x00).await,
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(
            transport.read(32, Duration::from_millis(10)).await,
            Err(TransportError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_open_missing_path_with_live_context_reports_refusal() {
        // Arrange: a context is already initialised with enumeration, as it
        // is once the hotplug poller is running.
        let enumerating = HidApi::new().expect("hidapi init");
        let transport = missing_device(Arc::new(Mutex::new(enumerating)));

        // Act
        let first = transport.open().await;
        let second = transport.open().await;

        // Assert: refusal, not a panicked blocking task or a poisoned slot.
        assert!(matches!(first, Ok(false)), "first open: {first:?}");
        assert!(matches!(second, Ok(false)), "second open: {second:?}");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_close_after_refused_open_leaves_transport_closed() {
        let transport = missing_device(shared_api().expect("hidapi init"));

        let opened = transport.open().await;
        transport.close().await;

        assert!(matches!(opened, Ok(false)));
        assert!(!transport.is_open());
        assert!(lock(&transport.device).is_none());
    }
}

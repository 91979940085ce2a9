//! Mock raw HID transport for unit and integration testing.
//!
//! # Why a mock transport?
//!
//! The real [`HidTransport`](super::hid::HidTransport) needs a physical
//! keyboard on the USB bus.  `MockTransport` replaces every HID call with
//! in-memory recording: each written packet is pushed into a
//! `Mutex<Vec<...>>` so test assertions can inspect exactly what reached the
//! "device" and in what order.
//!
//! By default the mock opens successfully and acknowledges every packet.
//! Individual writes (counted from 0 across the lifetime of the mock) can be
//! scripted to fail in the ways a real device fails:
//!
//! | Method              | Effect on write N                       |
//! |---------------------|-----------------------------------------|
//! | `fail_write_at`     | `write` returns `-1`                    |
//! | `raise_error_at`    | `write` returns `Err(TransportError)`   |
//! | `raise_errors_from` | same, for `count` writes starting at N  |
//! | `reject_ack_at`     | echo status byte is non-zero            |
//! | `drop_ack_at`       | `read` returns nothing (timeout)        |
//!
//! A failing write is still recorded, so "chunk 17 failed and nothing after
//! it was written" shows up as exactly 18 recorded packets.
//!
//! # Usage in tests
//!
//! ```ignore
//! let transport = Arc::new(MockTransport::new());
//! let session = DeviceSession::new(identity, transport.clone());
//! session.open().await.unwrap();
//! session.send(&Message::StopCommunication, timeout).await;
//!
//! assert_eq!(transport.opcodes(), vec![0x03]);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use qmk_display_core::protocol::messages::{Packet, ACK_OK, PACKET_SIZE};

use crate::application::device_session::{RawTransport, TransportError};

#[derive(Debug, Default, Clone, Copy)]
struct Script {
    fail_write_at: Option<usize>,
    /// First failing write index and number of failing writes.
    raise_error_span: Option<(usize, usize)>,
    reject_ack_at: Option<usize>,
    drop_ack_at: Option<usize>,
    write_delay: Option<Duration>,
}

/// A transport that records all calls without touching any hardware.
pub struct MockTransport {
    /// Every packet passed to `write`, in call order.
    pub written: Mutex<Vec<Packet>>,
    /// The report id passed alongside each written packet.
    pub written_report_ids: Mutex<Vec<u8>>,
    /// Number of times a write started while another write was still waiting
    /// for its echo.  Stays 0 when sends are properly serialized.
    pub overlapping_writes: AtomicUsize,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    accept_open: AtomicBool,
    is_open: AtomicBool,
    awaiting_echo: AtomicBool,
    script: Mutex<Script>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            written_report_ids: Mutex::new(Vec::new()),
            overlapping_writes: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            accept_open: AtomicBool::new(true),
            is_open: AtomicBool::new(false),
            awaiting_echo: AtomicBool::new(false),
            script: Mutex::new(Script::default()),
        }
    }
}

impl MockTransport {
    /// Creates a closed mock that opens successfully and acknowledges
    /// everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Controls whether subsequent `open` calls succeed.
    pub fn set_accept_open(&self, accept: bool) {
        self.accept_open.store(accept, Ordering::SeqCst);
    }

    pub fn fail_write_at(&self, index: usize) {
        self.script.lock().unwrap().fail_write_at = Some(index);
    }

    pub fn raise_error_at(&self, index: usize) {
        self.raise_errors_from(index, 1);
    }

    /// Makes `count` consecutive writes, starting at `index`, raise an error
    /// (a keyboard unplugged and replugged behind a stale handle).
    pub fn raise_errors_from(&self, index: usize, count: usize) {
        self.script.lock().unwrap().raise_error_span = Some((index, count));
    }

    pub fn reject_ack_at(&self, index: usize) {
        self.script.lock().unwrap().reject_ack_at = Some(index);
    }

    pub fn drop_ack_at(&self, index: usize) {
        self.script.lock().unwrap().drop_ack_at = Some(index);
    }

    /// Makes every write take `delay` (virtual time under a paused clock).
    pub fn set_write_delay(&self, delay: Duration) {
        self.script.lock().unwrap().write_delay = Some(delay);
    }

    /// Snapshot of every packet written so far.
    pub fn packets(&self) -> Vec<Packet> {
        self.written.lock().unwrap().clone()
    }

    /// Byte 0 of every packet written so far.
    pub fn opcodes(&self) -> Vec<u8> {
        self.written.lock().unwrap().iter().map(|p| p[0]).collect()
    }

    pub fn report_ids(&self) -> Vec<u8> {
        self.written_report_ids.lock().unwrap().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn last_index(&self) -> Option<usize> {
        self.written.lock().unwrap().len().checked_sub(1)
    }
}

#[async_trait]
impl RawTransport for MockTransport {
    async fn open(&self) -> Result<bool, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let accepted = self.accept_open.load(Ordering::SeqCst);
        if accepted {
            self.is_open.store(true, Ordering::SeqCst);
        }
        Ok(accepted)
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.is_open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    async fn write(&self, packet: &Packet, report_id: u8) -> Result<i32, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if self.awaiting_echo.swap(true, Ordering::SeqCst) {
            self.overlapping_writes.fetch_add(1, Ordering::SeqCst);
        }

        let script = *self.script.lock().unwrap();
        if let Some(delay) = script.write_delay {
            tokio::time::sleep(delay).await;
        }

        let index = {
            let mut written = self.written.lock().unwrap();
            written.push(*packet);
            written.len() - 1
        };
        self.written_report_ids.lock().unwrap().push(report_id);

        let raises = script
            .raise_error_span
            .is_some_and(|(first, count)| (first..first + count).contains(&index));
        if raises {
            self.awaiting_echo.store(false, Ordering::SeqCst);
            return Err(TransportError::Hid("mock transport failure".to_string()));
        }
        if script.fail_write_at == Some(index) {
            self.awaiting_echo.store(false, Ordering::SeqCst);
            return Ok(-1);
        }
        Ok((PACKET_SIZE + 1) as i32)
    }

    async fn read(&self, size: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.awaiting_echo.store(false, Ordering::SeqCst);
        let script = *self.script.lock().unwrap();
        let index = self.last_index();

        if index.is_some() && script.drop_ack_at == index {
            return Ok(Vec::new());
        }
        let status = if index.is_some() && script.reject_ack_at == index {
            0x01
        } else {
            ACK_OK
        };
        let mut echo = vec![0u8; size];
        if let Some(first) = echo.first_mut() {
            *first = status;
        }
        Ok(echo)
    }
}

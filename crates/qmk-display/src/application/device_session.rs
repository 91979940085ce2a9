//! DeviceSession: one open keyboard handle plus the send discipline around it.
//!
//! # What does a send look like on the wire? (for beginners)
//!
//! Raw HID is a request/echo protocol.  For every 32-byte packet the host
//! writes, the keyboard firmware answers with one 32-byte report whose first
//! byte is a status code.  A send therefore is:
//!
//! ```text
//! encode(message)            -> 1 packet (or 32 for an image)
//! for each packet:
//!     write(packet)          -> negative result = failure
//!     read(32, timeout)      -> empty / short / non-zero status = failure
//! ```
//!
//! Two tasks may hold the same session (the worker streaming telemetry and
//! the supervisor sending the final `StopCommunication`).  Interleaving their
//! writes would corrupt the echo pairing, so every send runs inside a single
//! async mutex: callers queue, they never interleave.
//!
//! # Finishing vs closing
//!
//! - [`DeviceSession::send_final`] sends one last message and then *seals*
//!   the session: every later send is refused with
//!   [`ResponseError::SessionFinished`].  This is how `StopCommunication`
//!   stays the last packet of a session even if the worker was in the middle
//!   of a send when it was stopped.
//! - [`DeviceSession::close`] releases the OS handle.  A closed session
//!   refuses to reopen; a new attach always produces a new session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qmk_display_core::protocol::codec::check_acknowledge;
use qmk_display_core::protocol::messages::{Opcode, Packet, PACKET_SIZE};
use qmk_display_core::{encode_message, DeviceIdentity, Message, Response, ResponseError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

/// Report id written in front of every packet.  QMK raw HID uses a single
/// unnumbered report, which hidapi expects to be prefixed with `0x00`.
pub const REPORT_ID: u8 = 0x00;

/// Error type for raw transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device is not open")]
    NotOpen,
    #[error("HID error: {0}")]
    Hid(String),
    #[error("blocking I/O task failed: {0}")]
    Task(String),
}

/// Byte-level access to one HID interface.
///
/// Implementations must bound every blocking call: `read` waits at most
/// `timeout`, and `write` must not block indefinitely.
#[async_trait]
pub trait RawTransport: Send + Sync {
    /// Opens the device.  Returns `Ok(false)` when the OS refused the open.
    async fn open(&self) -> Result<bool, TransportError>;

    /// Releases the OS handle.  Closing a closed transport is a no-op.
    async fn close(&self);

    fn is_open(&self) -> bool;

    /// Writes one packet preceded by `report_id`.
    ///
    /// Returns the number of bytes written; a negative value is a failure the
    /// device reported without raising an error.
    async fn write(&self, packet: &Packet, report_id: u8) -> Result<i32, TransportError>;

    /// Reads one report of up to `size` bytes.  An empty vector means nothing
    /// arrived within `timeout`.
    async fn read(&self, size: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Default)]
struct SendState {
    finished: bool,
}

/// One open keyboard handle bound to the identity it was attached under.
pub struct DeviceSession {
    id: Uuid,
    identity: DeviceIdentity,
    transport: Arc<dyn RawTransport>,
    send_lock: Mutex<SendState>,
    closed: AtomicBool,
}

impl DeviceSession {
    pub fn new(identity: DeviceIdentity, transport: Arc<dyn RawTransport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            transport,
            send_lock: Mutex::new(SendState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Unique id used to correlate log lines of this session.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// `true` while the handle is open and the session has not been closed.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_open()
    }

    /// Opens the underlying handle.
    ///
    /// Returns `Ok(false)` when the OS refused the open.
    ///
    /// # Errors
    ///
    /// [`ResponseError::SessionClosed`] once [`close`](Self::close) has been
    /// called, or [`ResponseError::Transport`] if the open itself raised.
    pub async fn open(&self) -> Result<bool, ResponseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ResponseError::SessionClosed);
        }
        self.transport.open().await.map_err(ResponseError::transport)
    }

    /// Closes the handle.  Idempotent.
    ///
    /// Does not queue behind the send lock: a send still in flight finishes
    /// its current exchange (the transport serializes close against it) and
    /// every later send is refused.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.close().await;
        debug!(session_id = %self.id, "device session closed");
    }

    /// Releases the OS handle but keeps the session usable, so the next
    /// [`open`](Self::open) acquires a fresh handle.
    ///
    /// For a handle that went stale because the keyboard was replugged under
    /// the same path.  No-op once the session is closed or finished.
    pub async fn reset(&self) {
        let state = self.send_lock.lock().await;
        if self.check_usable(&state).is_err() {
            return;
        }
        self.transport.close().await;
        debug!(session_id = %self.id, "device handle released for reopen");
    }

    /// Sends `message` and waits up to `timeout` for each echo.
    ///
    /// Never fails with an `Err`: every failure is a [`Response::Error`].
    /// For an `Image` the first failing chunk aborts the transfer and later
    /// chunks are never written.
    pub async fn send(&self, message: &Message, timeout: Duration) -> Response {
        let state = self.send_lock.lock().await;
        if let Err(e) = self.check_usable(&state) {
            return Response::Error(e);
        }
        self.transmit(message, timeout).await
    }

    /// Sends `message` as the last message of this session, then seals it.
    ///
    /// Nothing is written when the handle is not open; the session is sealed
    /// regardless.
    pub async fn send_final(&self, message: &Message, timeout: Duration) -> Response {
        let mut state = self.send_lock.lock().await;
        if let Err(e) = self.check_usable(&state) {
            return Response::Error(e);
        }
        state.finished = true;

        if !self.transport.is_open() {
            return Response::Error(ResponseError::Transport {
                reason: "device not open".to_string(),
                source: None,
            });
        }
        self.transmit(message, timeout).await
    }

    fn check_usable(&self, state: &SendState) -> Result<(), ResponseError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ResponseError::SessionClosed)
        } else if state.finished {
            Err(ResponseError::SessionFinished)
        } else {
            Ok(())
        }
    }

    /// Must be called with the send lock held.
    async fn transmit(&self, message: &Message, timeout: Duration) -> Response {
        let packets = match encode_message(message) {
            Ok(packets) => packets,
            Err(e) => return Response::Error(e.into()),
        };

        for packet in &packets {
            if let Err(e) = self.exchange(message.opcode(), packet, timeout).await {
                return Response::Error(e);
            }
        }
        trace!(session_id = %self.id, opcode = ?message.opcode(), packets = packets.len(), "message acknowledged");
        Response::Acknowledge(message.clone())
    }

    async fn exchange(
        &self,
        opcode: Opcode,
        packet: &Packet,
        timeout: Duration,
    ) -> Result<(), ResponseError> {
        let code = self
            .transport
            .write(packet, REPORT_ID)
            .await
            .map_err(ResponseError::transport)?;
        if code < 0 {
            return Err(ResponseError::WriteFailed { opcode, code });
        }

        let received = self
            .transport
            .read(PACKET_SIZE, timeout)
            .await
            .map_err(ResponseError::transport)?;
        check_acknowledge(packet, &received)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::MockTransport;
    use qmk_display_core::protocol::response::AckFailure;
    use qmk_display_core::{HostVersion, Image, Percent};

    const TIMEOUT: Duration = Duration::from_millis(1000);

    async fn open_session() -> (Arc<MockTransport>, DeviceSession) {
        let transport = Arc::new(MockTransport::new());
        let session = DeviceSession::new(DeviceIdentity::default(), transport.clone());
        assert!(session.open().await.unwrap());
        (transport, session)
    }

    fn telemetry(cpu: u8, ram: u8) -> Message {
        Message::hardware_state(Percent::new(cpu).unwrap(), Percent::new(ram).unwrap())
    }

    #[tokio::test]
    async fn test_send_hardware_state_writes_one_packet_with_report_id() {
        // Arrange
        let (transport, session) = open_session().await;

        // Act
        let response = session.send(&telemetry(42, 67), TIMEOUT).await;

        // Assert
        assert!(response.is_acknowledge());
        let packets = transport.packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..3], &[0x02, 42, 67]);
        assert_eq!(transport.report_ids(), vec![REPORT_ID]);
    }

    #[tokio::test]
    async fn test_send_returns_write_failed_for_negative_write_result() {
        let (transport, session) = open_session().await;
        transport.fail_write_at(0);

        let response = session
            .send(&Message::Version(HostVersion::new(1, 1, 0)), TIMEOUT)
            .await;

        assert!(matches!(
            response.error(),
            Some(ResponseError::WriteFailed {
                opcode: Opcode::Version,
                code: -1
            })
        ));
    }

    #[tokio::test]
    async fn test_send_wraps_transport_error_with_its_message() {
        let (transport, session) = open_session().await;
        transport.raise_error_at(0);

        let response = session.send(&Message::StopCommunication, TIMEOUT).await;

        match response.error() {
            Some(ResponseError::Transport { reason, source }) => {
                assert!(reason.contains("mock transport failure"), "got: {reason}");
                assert!(source.is_some());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_reports_timeout_as_empty_response() {
        let (transport, session) = open_session().await;
        transport.drop_ack_at(0);

        let response = session.send(&telemetry(1, 2), TIMEOUT).await;

        assert!(matches!(
            response.error(),
            Some(ResponseError::InvalidResponse {
                reason: AckFailure::Empty,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_image_with_wrong_length_never_reaches_transport() {
        let (transport, session) = open_session().await;

        let response = session
            .send(&Message::Image(Image::new(vec![0u8; 100])), TIMEOUT)
            .await;

        assert!(matches!(response.error(), Some(ResponseError::Codec(_))));
        assert!(transport.packets().is_empty());
    }

    #[tokio::test]
    async fn test_send_final_seals_the_session() {
        let (transport, session) = open_session().await;

        let stop = session.send_final(&Message::StopCommunication, TIMEOUT).await;
        let late = session.send(&telemetry(5, 5), TIMEOUT).await;
        let second_stop = session.send_final(&Message::StopCommunication, TIMEOUT).await;

        assert!(stop.is_acknowledge());
        assert!(matches!(late.error(), Some(ResponseError::SessionFinished)));
        assert!(matches!(second_stop.error(), Some(ResponseError::SessionFinished)));
        assert_eq!(transport.opcodes(), vec![0x03]);
    }

    #[tokio::test]
    async fn test_send_final_on_unopened_session_writes_nothing() {
        let transport = Arc::new(MockTransport::new());
        let session = DeviceSession::new(DeviceIdentity::default(), transport.clone());

        let response = session.send_final(&Message::StopCommunication, TIMEOUT).await;

        assert!(!response.is_acknowledge());
        assert!(transport.packets().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_prevents_reopen() {
        let (transport, session) = open_session().await;

        session.close().await;
        session.close().await;

        assert_eq!(transport.close_calls(), 1);
        assert!(!session.is_open());
        assert!(matches!(session.open().await, Err(ResponseError::SessionClosed)));
        assert!(matches!(
            session.send(&Message::StopCommunication, TIMEOUT).await.error(),
            Some(ResponseError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_reset_releases_handle_but_allows_reopen() {
        let (transport, session) = open_session().await;

        session.reset().await;
        assert!(!session.is_open());
        let reopened = session.open().await.unwrap();
        let response = session.send(&telemetry(3, 4), TIMEOUT).await;

        assert!(reopened);
        assert!(response.is_acknowledge());
        assert_eq!(transport.close_calls(), 1);
        assert_eq!(transport.open_calls(), 2);
    }

    #[tokio::test]
    async fn test_reset_after_final_send_is_a_no_op() {
        let (transport, session) = open_session().await;
        session.send_final(&Message::StopCommunication, TIMEOUT).await;

        session.reset().await;

        assert_eq!(transport.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_open_reports_refusal_as_false() {
        let transport = Arc::new(MockTransport::new());
        transport.set_accept_open(false);
        let session = DeviceSession::new(DeviceIdentity::default(), transport.clone());

        assert!(!session.open().await.unwrap());
        assert!(!session.is_open());
        assert_eq!(transport.open_calls(), 1);
    }
}

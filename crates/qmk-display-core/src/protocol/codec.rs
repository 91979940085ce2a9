//! Packet codec for the QMK Display raw HID protocol.
//!
//! Wire format (every packet is exactly 32 bytes, unused bytes zero):
//! ```text
//! Version          [0x01][major][minor][patch][0 ...]
//! HardwareState    [0x02][cpu %][ram %][0 ...]
//! StopCommunication[0x03][0 ...]
//! ImageChunk       [0x04][index 0..31][16 pixel bytes][0 ...]
//! ```
//!
//! The keyboard echoes one 32-byte report per packet; byte 0 of the echo is a
//! status byte that must equal [`ACK_OK`].
//!
//! Encoding and decoding are pure: nothing here touches a device.

use thiserror::Error;
use tracing::trace;

use crate::protocol::messages::{
    HardwareState, HostVersion, Image, Message, Opcode, Packet, ACK_OK, CHUNK_DATA_OFFSET,
    CHUNK_INDEX_OFFSET, IMAGE_CHUNK_SIZE, IMAGE_SIZE, PACKET_SIZE,
};
use crate::protocol::response::{AckFailure, Response, ResponseError};

/// Errors that can occur while encoding a message.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The image buffer is not exactly [`IMAGE_SIZE`] bytes.
    #[error("invalid image length: expected {expected} bytes, got {actual}")]
    InvalidImageLength { expected: usize, actual: usize },

    /// A version string is not `major.minor.patch` with byte-sized parts.
    #[error("invalid version string: '{0}'")]
    InvalidVersion(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into the packets that carry it, in transmission order.
///
/// `Image` yields exactly 32 chunk packets with ascending indices; every other
/// message yields exactly one packet.
///
/// # Errors
///
/// Returns [`CodecError::InvalidImageLength`] for an image that is not 512
/// bytes long.  No packet is produced in that case.
///
/// # Examples
///
/// ```rust
/// use qmk_display_core::protocol::{encode_message, Message};
///
/// let packets = encode_message(&Message::StopCommunication).unwrap();
/// assert_eq!(packets.len(), 1);
/// assert_eq!(packets[0][0], 0x03);
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<Packet>, CodecError> {
    match msg {
        Message::Version(v) => Ok(vec![encode_version(v)]),
        Message::HardwareState(s) => Ok(vec![encode_hardware_state(s)]),
        Message::StopCommunication => Ok(vec![new_packet(Opcode::StopCommunication)]),
        Message::Image(image) => encode_image(image),
    }
}

/// Checks one echoed report against the packet that was sent.
///
/// The report is an acknowledgement iff it is non-empty, exactly as long as
/// the request, and starts with [`ACK_OK`].
///
/// # Errors
///
/// Returns [`ResponseError::InvalidResponse`] carrying the request and the
/// received bytes so the caller can log both.
pub fn check_acknowledge(request: &Packet, received: &[u8]) -> Result<(), ResponseError> {
    let reason = if received.is_empty() {
        Some(AckFailure::Empty)
    } else if received.len() != request.len() {
        Some(AckFailure::LengthMismatch {
            expected: request.len(),
            actual: received.len(),
        })
    } else if received[0] != ACK_OK {
        Some(AckFailure::Rejected {
            status: received[0],
        })
    } else {
        None
    };

    match reason {
        None => Ok(()),
        Some(reason) => {
            trace!(?reason, request = ?request, received = ?received, "packet not acknowledged");
            Err(ResponseError::InvalidResponse {
                reason,
                request: *request,
                received: received.to_vec(),
            })
        }
    }
}

/// Classifies the echo of a single-packet message as a [`Response`].
pub fn decode_response(msg: &Message, request: &Packet, received: &[u8]) -> Response {
    match check_acknowledge(request, received) {
        Ok(()) => Response::Acknowledge(msg.clone()),
        Err(e) => Response::Error(e),
    }
}

// ── Per-message encode helpers ────────────────────────────────────────────────

fn new_packet(opcode: Opcode) -> Packet {
    let mut packet = [0u8; PACKET_SIZE];
    packet[0] = opcode as u8;
    packet
}

fn encode_version(v: &HostVersion) -> Packet {
    let mut packet = new_packet(Opcode::Version);
    packet[1] = v.major;
    packet[2] = v.minor;
    packet[3] = v.patch;
    packet
}

fn encode_hardware_state(s: &HardwareState) -> Packet {
    let mut packet = new_packet(Opcode::HardwareState);
    packet[1] = s.cpu_usage.get();
    packet[2] = s.ram_usage.get();
    packet
}

fn encode_image(image: &Image) -> Result<Vec<Packet>, CodecError> {
    if image.len() != IMAGE_SIZE {
        return Err(CodecError::InvalidImageLength {
            expected: IMAGE_SIZE,
            actual: image.len(),
        });
    }

    let packets = image
        .pixels()
        .chunks_exact(IMAGE_CHUNK_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let mut packet = new_packet(Opcode::ImageChunk);
            // IMAGE_CHUNK_COUNT is 32, so the index always fits in a byte.
            packet[CHUNK_INDEX_OFFSET] = index as u8;
            packet[CHUNK_DATA_OFFSET..CHUNK_DATA_OFFSET + IMAGE_CHUNK_SIZE].copy_from_slice(chunk);
            packet
        })
        .collect();
    Ok(packets)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! All QMK Display protocol message types.
//!
//! Every command travels in a single fixed-size raw HID report of
//! [`PACKET_SIZE`] bytes.  Byte 0 is the [`Opcode`]; the payload follows and
//! unused bytes are zero.  The keyboard acknowledges each packet by echoing a
//! report of the same size whose first byte is [`ACK_OK`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::percent::Percent;
use crate::protocol::codec::CodecError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of every packet in bytes (QMK raw HID report size).
pub const PACKET_SIZE: usize = 32;

/// Status byte at offset 0 of an echoed report that signals success.
pub const ACK_OK: u8 = 0x00;

/// Width of the keyboard bitmap in pixels.
pub const IMAGE_WIDTH: usize = 16;

/// Height of the keyboard bitmap in pixels.
pub const IMAGE_HEIGHT: usize = 32;

/// Exact size of an image buffer in bytes.
pub const IMAGE_SIZE: usize = 512;

/// Number of image bytes carried by one chunk packet.
pub const IMAGE_CHUNK_SIZE: usize = 16;

/// Number of chunk packets an image is split into.
pub const IMAGE_CHUNK_COUNT: usize = IMAGE_SIZE / IMAGE_CHUNK_SIZE;

/// Offset of the chunk index inside an image chunk packet.
pub const CHUNK_INDEX_OFFSET: usize = 1;

/// Offset of the pixel data inside an image chunk packet.
pub const CHUNK_DATA_OFFSET: usize = 2;

/// A single fixed-size packet.
pub type Packet = [u8; PACKET_SIZE];

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Command byte stored at offset 0 of every outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Version = 0x01,
    HardwareState = 0x02,
    StopCommunication = 0x03,
    ImageChunk = 0x04,
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Opcode::Version),
            0x02 => Ok(Opcode::HardwareState),
            0x03 => Ok(Opcode::StopCommunication),
            0x04 => Ok(Opcode::ImageChunk),
            _ => Err(()),
        }
    }
}

// ── Per-message payload types ─────────────────────────────────────────────────

/// Host software version announced at the start of every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl HostVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for HostVersion {
    type Err = CodecError;

    /// Parses a `"major.minor.patch"` string such as a crate version.
    ///
    /// Each component must fit in one byte; anything else is rejected rather
    /// than silently truncated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidVersion(s.to_string());

        let mut parts = s.trim().split('.');
        let mut component = || -> Result<u8, CodecError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u8>()
                .map_err(|_| invalid())
        };

        let version = Self::new(component()?, component()?, component()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareState {
    pub cpu_usage: Percent,
    pub ram_usage: Percent,
}

/// A 16×32 bitmap destined for the keyboard display.
///
/// The buffer length is not checked on construction; the codec refuses to
/// encode anything other than [`IMAGE_SIZE`] bytes, so an invalid image never
/// reaches the transport.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Image {
    pixels: Vec<u8>,
}

impl Image {
    pub fn new(pixels: impl Into<Vec<u8>>) -> Self {
        Self {
            pixels: pixels.into(),
        }
    }

    /// An all-zero image of the correct size.
    pub fn blank() -> Self {
        Self::new(vec![0u8; IMAGE_SIZE])
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image").field("len", &self.pixels.len()).finish()
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// A command sent from the host to the keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Message {
    /// Announces the host software version; first packet of every session.
    Version(HostVersion),
    /// Periodic CPU / RAM sample.
    HardwareState(HardwareState),
    /// Tells the keyboard the host is going away so it can return to its idle
    /// display.  Last packet of every session.
    StopCommunication,
    /// A full bitmap, transmitted as [`IMAGE_CHUNK_COUNT`] chunk packets.
    Image(Image),
}

impl Message {
    /// Returns the opcode carried in byte 0 of this message's packet(s).
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Version(_) => Opcode::Version,
            Message::HardwareState(_) => Opcode::HardwareState,
            Message::StopCommunication => Opcode::StopCommunication,
            Message::Image(_) => Opcode::ImageChunk,
        }
    }

    /// Convenience constructor for a telemetry sample.
    pub fn hardware_state(cpu_usage: Percent, ram_usage: Percent) -> Self {
        Message::HardwareState(HardwareState {
            cpu_usage,
            ram_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_try_from_known_values() {
        assert_eq!(Opcode::try_from(0x01), Ok(Opcode::Version));
        assert_eq!(Opcode::try_from(0x02), Ok(Opcode::HardwareState));
        assert_eq!(Opcode::try_from(0x03), Ok(Opcode::StopCommunication));
        assert_eq!(Opcode::try_from(0x04), Ok(Opcode::ImageChunk));
    }

    #[test]
    fn test_opcode_try_from_rejects_ack_byte_and_unknown() {
        assert_eq!(Opcode::try_from(ACK_OK), Err(()));
        assert_eq!(Opcode::try_from(0x05), Err(()));
    }

    #[test]
    fn test_chunk_geometry_covers_whole_image() {
        assert_eq!(IMAGE_WIDTH * IMAGE_HEIGHT, IMAGE_SIZE);
        assert_eq!(IMAGE_CHUNK_COUNT, 32);
        assert!(CHUNK_DATA_OFFSET + IMAGE_CHUNK_SIZE <= PACKET_SIZE);
    }

    #[test]
    fn test_host_version_parses_crate_version() {
        let v: HostVersion = "1.1.0".parse().unwrap();
        assert_eq!(v, HostVersion::new(1, 1, 0));
        assert_eq!(v.to_string(), "1.1.0");
    }

    #[test]
    fn test_host_version_rejects_malformed_strings() {
        for bad in ["", "1", "1.2", "1.2.3.4", "a.b.c", "1.2.x"] {
            assert!(
                matches!(bad.parse::<HostVersion>(), Err(CodecError::InvalidVersion(_))),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_host_version_rejects_components_wider_than_a_byte() {
        let result = "1.256.0".parse::<HostVersion>();
        assert_eq!(result, Err(CodecError::InvalidVersion("1.256.0".to_string())));
    }

    #[test]
    fn test_message_opcode_matches_variant() {
        assert_eq!(Message::Version(HostVersion::new(1, 0, 0)).opcode(), Opcode::Version);
        assert_eq!(Message::StopCommunication.opcode(), Opcode::StopCommunication);
        assert_eq!(Message::Image(Image::blank()).opcode(), Opcode::ImageChunk);
        assert_eq!(
            Message::hardware_state(Percent::default(), Percent::MAX).opcode(),
            Opcode::HardwareState
        );
    }

    #[test]
    fn test_image_debug_does_not_dump_pixels() {
        let text = format!("{:?}", Image::blank());
        assert_eq!(text, "Image { len: 512 }");
    }
}

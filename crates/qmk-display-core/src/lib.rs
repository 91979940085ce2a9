//! # qmk-display-core
//!
//! Shared library for the QMK Display host containing the raw HID wire
//! protocol codec and the small set of domain types the host reasons about.
//!
//! It has zero dependencies on OS APIs, USB libraries, or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! The host program feeds a keyboard with a tiny built-in display.  Every
//! second it samples CPU and RAM usage and pushes them to the keyboard, which
//! renders them on its screen.  The keyboard firmware (QMK) exposes a *raw
//! HID* endpoint that exchanges fixed 32-byte reports in both directions.
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`protocol`** – How commands are laid out in 32-byte packets, how the
//!   512-byte image is split into 32 chunks, and how the echoed reply from the
//!   keyboard is classified as an acknowledgement or an error.
//!
//! - **`domain`** – The identity triple that selects the target keyboard among
//!   all attached HID devices, and the clamped percentage type used for
//!   telemetry values.

pub mod domain;
pub mod protocol;

pub use domain::identity::DeviceIdentity;
pub use domain::percent::Percent;
pub use protocol::codec::{decode_response, encode_message, CodecError};
pub use protocol::messages::{HardwareState, HostVersion, Image, Message, Opcode, Packet};
pub use protocol::response::{Response, ResponseError};

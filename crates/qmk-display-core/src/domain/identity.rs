//! Identity of the target keyboard among all attached HID devices.
//!
//! # Why three numbers? (for beginners)
//!
//! A single USB keyboard usually exposes several HID *interfaces*: the normal
//! keyboard interface, a consumer-control interface for media keys, and (on
//! QMK firmware with raw HID enabled) a vendor-defined interface that accepts
//! arbitrary 32-byte reports.  All of them share the same vendor and product
//! ids, so the *usage* id is what tells the raw HID interface apart.
//!
//! Two identities are equal iff all three fields match.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default product id of the reference keyboard.
pub const DEFAULT_PRODUCT_ID: u16 = 0xb4c2;

/// Default vendor id of the reference keyboard.
pub const DEFAULT_VENDOR_ID: u16 = 0x8d1d;

/// Default HID usage id of the QMK raw HID interface.
pub const DEFAULT_USAGE_ID: u16 = 0x61;

/// Error returned when an id string cannot be parsed.
#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("empty device id")]
    Empty,

    #[error("invalid device id '{0}': expected 0x-prefixed hex or decimal in 0..=65535")]
    Invalid(String),
}

/// The (product, vendor, usage) triple identifying "the same logical device"
/// across attach and detach notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub product_id: u16,
    pub vendor_id: u16,
    pub usage_id: u16,
}

impl DeviceIdentity {
    pub const fn new(product_id: u16, vendor_id: u16, usage_id: u16) -> Self {
        Self {
            product_id,
            vendor_id,
            usage_id,
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, DEFAULT_USAGE_ID)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vendorId={:#06x}, productId={:#06x}, usageId={:#04x}",
            self.vendor_id, self.product_id, self.usage_id
        )
    }
}

/// Parses a device id written either as `0x`-prefixed hex (`"0xb4c2"`) or as
/// plain decimal (`"46274"`).
///
/// # Errors
///
/// Returns [`IdentityError`] if the string is empty, malformed, or does not
/// fit in 16 bits.
///
/// # Examples
///
/// ```rust
/// use qmk_display_core::domain::identity::parse_device_id;
///
/// assert_eq!(parse_device_id("0x61"), Ok(0x61));
/// assert_eq!(parse_device_id("97"), Ok(97));
/// ```
pub fn parse_device_id(raw: &str) -> Result<u16, IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::Empty);
    }

    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => trimmed.parse::<u16>(),
    };

    parsed.map_err(|_| IdentityError::Invalid(trimmed.to_string()))
}

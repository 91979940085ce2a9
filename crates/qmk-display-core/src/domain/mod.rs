//! Domain types for the QMK Display host.
//!
//! Pure values with no infrastructure dependencies: they can be compiled and
//! tested on any platform without a keyboard attached.

/// Identity triple of the target keyboard.
pub mod identity;

/// Integer percentage clamped to `0..=100`.
pub mod percent;

//! qmk-display library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does qmk-display do? (for beginners)
//!
//! The host program watches the USB bus for one specific keyboard.  When the
//! keyboard is plugged in, the host:
//!
//! 1. Opens the keyboard's raw HID interface.
//! 2. Announces its own version with a `Version` packet.
//! 3. Waits a moment for the firmware to settle, then sends a
//!    `HardwareState` packet with the current CPU and RAM usage once per
//!    second.
//!
//! When the keyboard is unplugged, or the host is shutting down, the host
//! sends a final `StopCommunication` packet (if the device is still there) so
//! the keyboard can go back to its idle screen.
//!
//! Only one keyboard session is ever active.  Plugging the same keyboard in
//! again replaces the old session instead of running two side by side.

/// Application layer: session, worker and supervisor use cases.
pub mod application;

/// Infrastructure layer: HID transport, hotplug, metrics and config adapters.
pub mod infrastructure;

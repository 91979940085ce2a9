//! Raw HID transport implementations.
//!
//! - **`hid`** – the production transport on top of `hidapi`.
//! - **`mock`** – an in-memory recording transport for tests.

pub mod hid;
pub mod mock;

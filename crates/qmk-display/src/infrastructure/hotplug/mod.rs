//! Hotplug source implementations.
//!
//! - **`hid`** – polls hidapi enumeration and diffs snapshots.
//! - **`mock`** – a hand-driven source for tests.

pub mod hid;
pub mod mock;

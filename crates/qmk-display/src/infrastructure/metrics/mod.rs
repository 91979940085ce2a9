//! Host metrics adapters.
//!
//! - **`system`** – CPU and RAM usage via the `sysinfo` crate.

pub mod system;

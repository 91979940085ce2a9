//! Infrastructure layer for the host.
//!
//! Contains OS-facing adapters: raw HID I/O, device hotplug detection, host
//! metrics and the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `qmk_display_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.
//!
//! # Sub-modules
//!
//! - **`transport`** – `RawTransport` over hidapi, plus a recording mock.
//! - **`hotplug`** – `HotplugSource` that polls hidapi enumeration, plus a
//!   hand-driven mock.
//! - **`metrics`** – `TelemetrySource` over sysinfo.
//! - **`storage`** – TOML configuration file.

pub mod hotplug;
pub mod metrics;
pub mod storage;
pub mod transport;

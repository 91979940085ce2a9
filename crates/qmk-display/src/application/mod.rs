//! Application layer use cases for the host.
//!
//! Everything here depends on traits ([`device_session::RawTransport`],
//! [`telemetry::TelemetrySource`], [`supervisor::HotplugSource`]) rather than
//! on hidapi or sysinfo, so the whole lifecycle can be driven by mocks under
//! a paused Tokio clock.
//!
//! # Sub-modules
//!
//! - **`device_session`** – One open keyboard handle.  Serializes every send,
//!   runs the codec, and turns every failure into a `Response::Error`.
//!
//! - **`telemetry`** – Samples CPU and RAM usage and clamps them into the
//!   `0..=100` range the protocol carries.
//!
//! - **`session_worker`** – The background task for one session: handshake,
//!   then periodic telemetry, with a failure backoff and whole-procedure retry.
//!
//! - **`supervisor`** – Reacts to attach/detach notifications and guarantees
//!   at most one running worker.

pub mod device_session;
pub mod session_worker;
pub mod supervisor;
pub mod telemetry;

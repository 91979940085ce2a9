//! Storage infrastructure: configuration file loading.
//!
//! The host never writes any state; the config file is read once at start-up
//! and command-line flags are layered on top of it in `main.rs`.

pub mod config;

//! Telemetry sampling: CPU and RAM usage as protocol percentages.
//!
//! Metric sources report floating-point percentages.  The first CPU sample
//! after start-up can be NaN, and rounding can push a value slightly past
//! 100, so [`sample`] clamps both values with
//! [`Percent::saturating_from_f64`] before they reach the codec.

use std::sync::{Arc, Mutex};

use qmk_display_core::{HardwareState, Percent};
use thiserror::Error;

/// Error type for telemetry sampling.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
}

/// Source of host usage metrics.
///
/// `cpu_usage_percent` is expected to compare against the previous call (one
/// prior tick snapshot), so the methods take `&mut self`.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySource: Send {
    /// CPU usage since the previous call, nominally `0.0..=100.0`.
    fn cpu_usage_percent(&mut self) -> Result<f64, TelemetryError>;

    /// Used RAM as a share of total RAM, nominally `0.0..=100.0`.
    fn ram_usage_percent(&mut self) -> Result<f64, TelemetryError>;
}

/// A telemetry source shared between successive session workers.
pub type SharedTelemetry = Arc<Mutex<dyn TelemetrySource>>;

/// Wraps a concrete source for sharing.
pub fn shared<T: TelemetrySource + 'static>(source: T) -> SharedTelemetry {
    Arc::new(Mutex::new(source))
}

/// Takes one sample and clamps both values into `0..=100`.
///
/// # Errors
///
/// Returns [`TelemetryError`] if either metric cannot be read.
pub fn sample(source: &SharedTelemetry) -> Result<HardwareState, TelemetryError> {
    let mut source = source
        .lock()
        .map_err(|_| TelemetryError::Unavailable("telemetry source poisoned".to_string()))?;
    let cpu = source.cpu_usage_percent()?;
    let ram = source.ram_usage_percent()?;
    Ok(HardwareState {
        cpu_usage: Percent::saturating_from_f64(cpu),
        ram_usage: Percent::saturating_from_f64(ram),
    })
}

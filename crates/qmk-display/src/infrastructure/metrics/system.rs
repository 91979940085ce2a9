//! `sysinfo`-backed telemetry source.
//!
//! CPU usage is only meaningful between two refreshes: sysinfo compares the
//! current CPU tick counters with the ones captured on the previous refresh.
//! [`SystemTelemetry::new`] primes that first snapshot, so the first real
//! sample (about a settle delay later) already covers a real interval.
//!
//! RAM usage is `(total - available) / total`, which counts reclaimable page
//! cache as free, matching what task managers report.

use sysinfo::System;

use crate::application::telemetry::{TelemetryError, TelemetrySource};

/// Host CPU and memory usage read through sysinfo.
pub struct SystemTelemetry {
    system: System,
}

impl SystemTelemetry {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Used share of memory in percent.  `None` when the total is unknown.
fn memory_usage_percent(total: u64, available: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(used as f64 / total as f64 * 100.0)
}

impl TelemetrySource for SystemTelemetry {
    fn cpu_usage_percent(&mut self) -> Result<f64, TelemetryError> {
        self.system.refresh_cpu_usage();
        Ok(f64::from(self.system.global_cpu_usage()))
    }

    fn ram_usage_percent(&mut self) -> Result<f64, TelemetryError> {
        self.system.refresh_memory();
        memory_usage_percent(self.system.total_memory(), self.system.available_memory())
            .ok_or_else(|| TelemetryError::Unavailable("total memory reported as 0".to_string()))
    }
}

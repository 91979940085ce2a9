//! TOML-based configuration for the host.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\QmkDisplay\config.toml`
//! - Linux:    `~/.config/qmk-display/config.toml` (or `$XDG_CONFIG_HOME`)
//! - macOS:    `~/Library/Application Support/QmkDisplay/config.toml`
//!
//! A missing file is not an error: the defaults match the reference keyboard
//! and the standard protocol timings.  Example with every key spelled out:
//!
//! ```toml
//! [device]
//! product_id = 0xb4c2
//! vendor_id = 0x8d1d
//! usage_id = 0x61
//!
//! [timing]
//! refresh_interval_ms = 1000
//! settle_delay_ms = 2000
//! failure_backoff_ms = 2000
//! read_timeout_ms = 1000
//! shutdown_timeout_ms = 10000
//! hotplug_poll_interval_ms = 500
//!
//! [logging]
//! level = "info"
//! ```
//!
//! TOML accepts `0x` hex integers natively, so device ids can be written the
//! same way `lsusb` prints them.
//!
//! # Serde default values
//!
//! Every section and field carries a `#[serde(default...)]` attribute, so a
//! file that sets a single key is valid and everything else keeps its
//! default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use qmk_display_core::domain::identity::{DEFAULT_PRODUCT_ID, DEFAULT_USAGE_ID, DEFAULT_VENDOR_ID};
use qmk_display_core::DeviceIdentity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::session_worker::{host_version, WorkerConfig};
use crate::application::supervisor::SupervisorConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which keyboard to talk to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "default_usage_id")]
    pub usage_id: u16,
}

/// Protocol and lifecycle timings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_hotplug_poll_interval_ms")]
    pub hotplug_poll_interval_ms: u64,
}

/// Logging settings.  `RUST_LOG`, when set, takes precedence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_product_id() -> u16 {
    DEFAULT_PRODUCT_ID
}
fn default_vendor_id() -> u16 {
    DEFAULT_VENDOR_ID
}
fn default_usage_id() -> u16 {
    DEFAULT_USAGE_ID
}
fn default_refresh_interval_ms() -> u64 {
    1000
}
fn default_settle_delay_ms() -> u64 {
    2000
}
fn default_failure_backoff_ms() -> u64 {
    2000
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
fn default_hotplug_poll_interval_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            product_id: default_product_id(),
            vendor_id: default_vendor_id(),
            usage_id: default_usage_id(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            failure_backoff_ms: default_failure_backoff_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            hotplug_poll_interval_ms: default_hotplug_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversions into runtime settings ─────────────────────────────────────────

impl DeviceConfig {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.product_id, self.vendor_id, self.usage_id)
    }
}

impl TimingConfig {
    pub fn hotplug_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_interval_ms)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            host_version: host_version(),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            failure_backoff: Duration::from_millis(self.failure_backoff_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

impl AppConfig {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            target: self.device.identity(),
            worker: self.timing.worker_config(),
            shutdown_timeout: Duration::from_millis(self.timing.shutdown_timeout_ms),
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the default location, returning
/// `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// See [`load_config_from`].  A missing platform config directory is not an
/// error here; defaults are used.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    match config_file_path() {
        Ok(path) => load_config_from(&path),
        Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
        Err(e) => Err(e),
    }
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Resolves the platform config base directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("QmkDisplay"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("qmk-display"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("QmkDisplay")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

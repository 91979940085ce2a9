//! QMK Display host application entry point.
//!
//! Watches the USB bus for the configured keyboard and, while it is
//! attached, streams CPU and RAM usage to its display.
//!
//! # Usage
//!
//! ```text
//! qmk-display [OPTIONS]
//!
//! Options:
//!   --config     <PATH>  Config file [default: platform config dir]
//!   --vendor-id  <ID>    Keyboard vendor id, hex (0x8d1d) or decimal
//!   --product-id <ID>    Keyboard product id, hex (0xb4c2) or decimal
//!   --usage-id   <ID>    Raw HID usage id, hex (0x61) or decimal
//!   --verbose            Log at debug level
//! ```
//!
//! Command-line values override the config file; `RUST_LOG`, when set,
//! overrides both for logging.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ HidHotplugSource::start()    -- poll thread, sends HotplugEvents
//!  └─ SessionSupervisor::run()     -- one worker per attached keyboard
//!  └─ Ctrl-C / SIGTERM
//!       ├─ HidHotplugSource::stop()
//!       └─ SessionSupervisor::shutdown()   -- bounded by shutdown_timeout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use qmk_display::application::session_worker::host_version;
use qmk_display::application::supervisor::{HotplugSource, SessionSupervisor};
use qmk_display::application::telemetry;
use qmk_display::infrastructure::hotplug::hid::HidHotplugSource;
use qmk_display::infrastructure::transport::hid::shared_api;
use qmk_display::infrastructure::metrics::system::SystemTelemetry;
use qmk_display::infrastructure::storage::config::{load_config, load_config_from, AppConfig};
use qmk_display_core::domain::identity::parse_device_id;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Streams host CPU and RAM usage to a QMK keyboard display over raw HID.
#[derive(Debug, Parser)]
#[command(name = "qmk-display", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "QMK_DISPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Keyboard vendor id, `0x`-prefixed hex or decimal.
    #[arg(long, env = "QMK_DISPLAY_VENDOR_ID", value_parser = parse_device_id)]
    vendor_id: Option<u16>,

    /// Keyboard product id, `0x`-prefixed hex or decimal.
    #[arg(long, env = "QMK_DISPLAY_PRODUCT_ID", value_parser = parse_device_id)]
    product_id: Option<u16>,

    /// HID usage id of the raw HID interface, `0x`-prefixed hex or decimal.
    #[arg(long, env = "QMK_DISPLAY_USAGE_ID", value_parser = parse_device_id)]
    usage_id: Option<u16>,

    /// Log at debug level (unless `RUST_LOG` is set).
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Loads the config file and layers the command-line overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    fn resolve_config(&self) -> anyhow::Result<AppConfig> {
        let config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => load_config().context("failed to load config")?,
        };
        Ok(self.apply_overrides(config))
    }

    fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(id) = self.vendor_id {
            config.device.vendor_id = id;
        }
        if let Some(id) = self.product_id {
            config.device.product_id = id;
        }
        if let Some(id) = self.usage_id {
            config.device.usage_id = id;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        config
    }
}

// ── Shutdown signals ──────────────────────────────────────────────────────────

/// The signals that trigger a clean shutdown: Ctrl-C everywhere, plus
/// SIGTERM on Unix (service stop, logout).
///
/// Handlers are installed by [`ShutdownSignals::register`], so a signal that
/// arrives before [`ShutdownSignals::recv`] is polled is not lost.
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                interrupt: signal(SignalKind::interrupt())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the first shutdown signal and returns its name.
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.terminate.recv() => "SIGTERM",
                _ = self.interrupt.recv() => "SIGINT",
            }
        }

        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "Ctrl-C",
                Err(_) => std::future::pending().await,
            }
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    init_tracing(&config.logging.level);

    let supervisor_config = config.supervisor_config();
    let target = supervisor_config.target;
    info!("QMK Display host {} starting", host_version());
    info!("searching for keyboard: {target}");

    let mut signals = ShutdownSignals::register().context("failed to install signal handlers")?;
    let telemetry = telemetry::shared(SystemTelemetry::new());
    let supervisor = Arc::new(SessionSupervisor::new(supervisor_config, telemetry));

    // ── Hotplug source ────────────────────────────────────────────────────────
    let (events_tx, events_rx) = mpsc::channel(64);
    let hid_api = shared_api().context("failed to initialise HID library")?;
    let mut hotplug = HidHotplugSource::new(target, config.timing.hotplug_poll_interval(), hid_api);
    hotplug
        .start(events_tx)
        .context("failed to start HID hotplug monitor")?;

    let event_loop = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.run(events_rx).await })
    };

    // ── Wait for Ctrl-C / SIGTERM ─────────────────────────────────────────────
    let signal = signals.recv().await;
    info!("{signal} received; shutting down");

    hotplug.stop();
    supervisor.shutdown().await;
    event_loop.abort();

    info!("QMK Display host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use qmk_display_core::DeviceIdentity;

    #[test]
    fn test_cli_without_arguments_keeps_config() {
        let cli = Cli::parse_from(["qmk-display"]);

        let config = cli.apply_overrides(AppConfig::default());

        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_cli_hex_ids_override_config() {
        // Arrange
        let cli = Cli::parse_from([
            "qmk-display",
            "--vendor-id=0x1234",
            "--product-id",
            "0xABCD",
            "--usage-id=97",
        ]);

        // Act
        let config = cli.apply_overrides(AppConfig::default());

        // Assert
        assert_eq!(config.device.identity(), DeviceIdentity::new(0xabcd, 0x1234, 0x61));
    }

    #[test]
    fn test_cli_rejects_malformed_id() {
        let result = Cli::try_parse_from(["qmk-display", "--vendor-id=0xZZ"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_verbose_forces_debug_level() {
        let cli = Cli::parse_from(["qmk-display", "--verbose"]);

        let config = cli.apply_overrides(AppConfig::default());

        assert_eq!(config.logging.level, "debug");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        // Arrange: handlers are installed, so SIGTERM no longer kills the
        // test process.
        let mut signals = ShutdownSignals::register().unwrap();

        // Act
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        let received = tokio::time::timeout(std::time::Duration::from_secs(5), signals.recv())
            .await
            .expect("SIGTERM must be delivered");

        // Assert
        assert!(status.success());
        assert_eq!(received, "SIGTERM");
    }

    #[test]
    fn test_cli_config_path_is_read() {
        let cli = Cli::parse_from(["qmk-display", "--config", "/nonexistent/qmk/config.toml"]);

        let config = cli.resolve_config().unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/nonexistent/qmk/config.toml")));
        assert_eq!(config, AppConfig::default());
    }
}

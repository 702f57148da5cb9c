use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

/// Initialize structured logging
///
/// Logs to a file when telemetry is enabled, stdout otherwise. The level is
/// taken from `RUST_LOG` with an `info` fallback.
///
/// # Errors
/// Returns error if the log directory or file cannot be created
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !config.enabled {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(());
    }

    let log_path = Config::expand_path(&config.log_path)?;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .init();

    tracing::info!(path = %log_path.display(), "telemetry initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "global tracing subscriber can only be initialized once per process"]
    fn test_init_disabled_logs_to_stdout() {
        let config = TelemetryConfig {
            enabled: false,
            log_path: String::new(),
        };
        assert!(init(&config).is_ok());
    }

    #[test]
    #[ignore = "global tracing subscriber can only be initialized once per process"]
    fn test_init_enabled_creates_log_file() {
        let dir = std::env::temp_dir().join("dictate_telemetry_test");
        let path = dir.join("dictate.log");
        let config = TelemetryConfig {
            enabled: true,
            log_path: path.to_string_lossy().into_owned(),
        };
        assert!(init(&config).is_ok());
        assert!(path.exists());
        let _ = fs::remove_dir_all(dir);
    }
}

//! Logging configuration using tracing
//!
//! stdout belongs to the headless NDJSON stream, so logs go to a daily file
//! and, on request, to stderr. Sync entry points are `#[instrument]`ed; their
//! spans are logged when they close so every sync leaves its duration behind.

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Filter directives environment variable
pub const LOG_ENV: &str = "LIVESYNC_LOG";

/// Overrides the log directory
pub const LOG_DIR_ENV: &str = "LIVESYNC_LOG_DIR";

/// Mirrors log lines to stderr when set to anything but `0`
pub const LOG_STDERR_ENV: &str = "LIVESYNC_LOG_STDERR";

const LOG_FILE_PREFIX: &str = "livesync.log";

/// Used when `LIVESYNC_LOG` is unset or invalid
const DEFAULT_FILTER: &str =
    "livesync_engine=info,livesync_device=info,livesync_core=info,mobile_livesync=info,warn";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/mobile-livesync/logs/` unless
/// `LIVESYNC_LOG_DIR` names another directory.
///
/// # Examples
/// ```bash
/// LIVESYNC_LOG=debug livesync ./app
/// LIVESYNC_LOG=livesync_device::channel=trace LIVESYNC_LOG_STDERR=1 livesync ./app
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stderr_layer = stderr_requested(std::env::var(LOG_STDERR_ENV).ok().as_deref()).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .with(stderr_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        "Live sync logging started"
    );

    Ok(())
}

fn stderr_requested(value: Option<&str>) -> bool {
    matches!(value, Some(v) if !v.is_empty() && v != "0")
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let override_dir = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from);
    Ok(log_directory(override_dir.as_deref(), dirs::data_local_dir()))
}

fn log_directory(override_dir: Option<&Path>, data_dir: Option<PathBuf>) -> PathBuf {
    match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => data_dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mobile-livesync")
            .join("logs"),
    }
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> Result<PathBuf> {
    let dir = get_log_directory()?;
    Ok(dir.join(LOG_FILE_PREFIX))
}

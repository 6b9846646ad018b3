//! Logging infrastructure for trailmint
//!
//! Logs are written to `~/.local/state/trailmint/trailmint.YYYY-MM-DD.log`
//! following XDG standards, one file per UTC day.
//! Nothing is ever written to stdout: the native-messaging host uses stdout
//! as its protocol channel.

use crate::config::{Config, LoggingConfig};
use crate::error::Error;
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_PREFIX: &str = "trailmint";
const LOG_FILE_SUFFIX: &str = "log";

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to XDG state directory
/// - Daily rotation, keeping `max_files` files
/// - Configurable log level via config or RUST_LOG env var
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;

    // Non-blocking writer for better performance
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Build the filter from config or env var
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Path of the log file written on `date` (UTC).
pub fn log_file_path(date: NaiveDate) -> PathBuf {
    Config::state_dir().join(format!(
        "{}.{}.{}",
        LOG_FILE_PREFIX,
        date.format("%Y-%m-%d"),
        LOG_FILE_SUFFIX
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_matches_daily_rotation() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let path = log_file_path(date);
        assert!(path.ends_with("trailmint.2024-03-09.log"));
        assert_eq!(path.parent(), Some(Config::state_dir().as_path()));
    }
}

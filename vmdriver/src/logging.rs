//! Diagnostic log setup.
//!
//! The driver only ever writes to the log through `tracing` macros. Hosts
//! that already install their own subscriber never need to call
//! [`init_logging`].

use crate::errors::{DriverError, DriverResult};
use crate::options::LoggingOptions;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log file name inside [`LoggingOptions::log_dir`].
pub const LOG_FILE_NAME: &str = "vmdriver.log";

/// Keeps the non-blocking file writer flushing for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber: stderr always, plus a file when
/// `log_dir` is configured.
///
/// Calling this more than once is harmless; only the first call installs.
pub fn init_logging(options: &LoggingOptions) -> DriverResult<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(&options.level));

    let file_layer = match &options.log_dir {
        Some(dir) if FILE_GUARD.get().is_none() => {
            std::fs::create_dir_all(dir).map_err(|e| {
                DriverError::Config(format!(
                    "Failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(env_filter(&options.level)),
            )
        }
        _ => None,
    };

    let installed = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            level = %options.level,
            log_dir = ?options.log_dir,
            "logging initialized"
        );
    }
    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

//! Error types for the hypervisor driver.

use thiserror::Error;

/// Hint appended to launch failures. Output drains may not have logged
/// anything yet when the process dies this early.
pub(crate) const VERBOSE_HINT: &str = "Please run with RUST_LOG=debug to get more info.";

/// Driver error type.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The external binary could not be started (missing, permission, bad path)
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// The process started but exited inside the startup grace window
    #[error("Startup error: {0}")]
    Startup(String),

    /// A synchronous command exited non-zero. Carries the trimmed stderr verbatim.
    #[error("{0}")]
    Runtime(String),

    /// The running process could not be signalled
    #[error("Termination error: {0}")]
    Termination(String),

    /// Version banner did not contain a dotted version number
    #[error("Parse error: {0}")]
    Parse(String),

    /// Disk image file operations (open, create, copy)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid driver configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal invariant broken (lock poisoned, task lost, ...)
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error not covered by a more specific variant
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

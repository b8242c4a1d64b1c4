//! Driver configuration.
//!
//! Options are plain serde structs so the orchestrator can persist them
//! alongside the rest of its build configuration. Paths are looked up on
//! `PATH` when they are not absolute.

use crate::errors::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default values for [`DriverOptions`].
pub mod defaults {
    /// Hypervisor control binary
    pub const HYPERVISOR_PATH: &str = "qemu-system-x86_64";

    /// Disk image conversion binary
    pub const IMAGE_TOOL_PATH: &str = "qemu-img";

    /// Window after launch in which an exit counts as a startup failure
    pub const STARTUP_GRACE_MS: u64 = 2000;

    /// How long the reaper lets output drains flush after the process exits
    pub const DRAIN_FLUSH_MS: u64 = 500;

    /// Flag passed to the hypervisor to print its version banner
    pub const VERSION_FLAG: &str = "-version";

    /// Log level used when RUST_LOG is unset
    pub const LOG_LEVEL: &str = "info";
}

/// Environment variable overriding [`DriverOptions::hypervisor_path`].
pub const ENV_HYPERVISOR: &str = "VMDRIVER_HYPERVISOR";
/// Environment variable overriding [`DriverOptions::image_tool_path`].
pub const ENV_IMAGE_TOOL: &str = "VMDRIVER_IMAGE_TOOL";
/// Environment variable overriding [`DriverOptions::startup_grace_ms`].
pub const ENV_STARTUP_GRACE_MS: &str = "VMDRIVER_STARTUP_GRACE_MS";

/// Configuration for a [`HypervisorDriver`](crate::HypervisorDriver).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverOptions {
    /// Path to the hypervisor control binary.
    pub hypervisor_path: PathBuf,
    /// Path to the disk image conversion binary.
    pub image_tool_path: PathBuf,
    /// Startup grace period in milliseconds.
    pub startup_grace_ms: u64,
    /// Drain flush window in milliseconds.
    pub drain_flush_ms: u64,
    /// Version flag understood by the hypervisor.
    pub version_flag: String,
    /// Diagnostic log configuration.
    pub logging: LoggingOptions,
}

/// Diagnostic log configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default filter when RUST_LOG is not set (e.g. "info", "vmdriver=debug").
    pub level: String,
    /// Also write logs to `<log_dir>/vmdriver.log` when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            hypervisor_path: PathBuf::from(defaults::HYPERVISOR_PATH),
            image_tool_path: PathBuf::from(defaults::IMAGE_TOOL_PATH),
            startup_grace_ms: defaults::STARTUP_GRACE_MS,
            drain_flush_ms: defaults::DRAIN_FLUSH_MS,
            version_flag: defaults::VERSION_FLAG.to_string(),
            logging: LoggingOptions::default(),
        }
    }
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            log_dir: None,
        }
    }
}

impl DriverOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> DriverResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Config(format!(
                "Failed to read driver config {}: {}",
                path.display(),
                e
            ))
        })?;
        let options: Self = serde_json::from_str(&raw).map_err(|e| {
            DriverError::Config(format!(
                "Failed to parse driver config {}: {}",
                path.display(),
                e
            ))
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Apply `VMDRIVER_*` environment overrides.
    pub fn apply_env(self) -> DriverResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> DriverResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_HYPERVISOR) {
            self.hypervisor_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_IMAGE_TOOL) {
            self.image_tool_path = PathBuf::from(path);
        }
        if let Some(grace) = lookup(ENV_STARTUP_GRACE_MS) {
            self.startup_grace_ms = grace.trim().parse().map_err(|e| {
                DriverError::Config(format!(
                    "{} must be a number of milliseconds, got {:?}: {}",
                    ENV_STARTUP_GRACE_MS, grace, e
                ))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check option values before any process is launched.
    pub fn validate(&self) -> DriverResult<()> {
        if self.hypervisor_path.as_os_str().is_empty() {
            return Err(DriverError::Config("hypervisor_path must not be empty".into()));
        }
        if self.image_tool_path.as_os_str().is_empty() {
            return Err(DriverError::Config("image_tool_path must not be empty".into()));
        }
        if self.startup_grace_ms == 0 {
            return Err(DriverError::Config(
                "startup_grace_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn drain_flush(&self) -> Duration {
        Duration::from_millis(self.drain_flush_ms)
    }
}

//! Hypervisor driver.
//!
//! This module provides the `Driver` trait the build-step state machine talks
//! to, and `HypervisorDriver`, its implementation on top of external
//! hypervisor and image-tool binaries.
//!
//! ## Architecture
//!
//! - **Supervisor**: launch / wait / stop for the long-running VM process
//! - **Runner**: one-shot commands (image conversion, version probe)
//! - **CompletionSignal**: single-fire exit notification shared by waiters
//!
//! Only the supervisor keeps state between calls; everything else is a
//! value-in, value-out helper.

mod drain;
mod driver;
mod image;
mod mock;
mod runner;
mod signal;
mod supervisor;
mod version;

use crate::errors::DriverResult;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub use driver::HypervisorDriver;
pub use image::copy_image;
pub use mock::MockDriver;
pub use runner::{CommandOutput, run_to_completion};
pub use signal::CompletionSignal;
pub use supervisor::{ProcessHandle, Supervisor};
pub use version::parse_version;

/// Operations the build steps need from a hypervisor.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Copy an image that needs no conversion straight to `destination`.
    async fn copy(&self, source: &Path, destination: &Path) -> DriverResult<()>;

    /// Forcefully stop the running machine. No-op if none is running.
    fn stop(&self) -> DriverResult<()>;

    /// Launch the hypervisor with `args` and return once it has survived
    /// the startup grace period.
    async fn launch(&self, args: &[String]) -> DriverResult<()>;

    /// Wait for the machine to shut down.
    ///
    /// Returns `false` if `cancel` fired first.
    async fn wait_for_shutdown(&self, cancel: &CancellationToken) -> bool;

    /// Run the image tool to completion.
    async fn run_image_tool(&self, args: &[String]) -> DriverResult<CommandOutput>;

    /// Check that the driver can function in this environment.
    fn verify(&self) -> DriverResult<()>;

    /// Version of the installed hypervisor.
    async fn version(&self) -> DriverResult<String>;
}

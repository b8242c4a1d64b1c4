//! `Driver` implementation backed by external hypervisor binaries.

use super::image::copy_image;
use super::runner::{CommandOutput, run_to_completion};
use super::signal::CompletionSignal;
use super::supervisor::Supervisor;
use super::version::parse_version;
use super::Driver;
use crate::errors::DriverResult;
use crate::options::DriverOptions;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Drives one VM at a time through the configured hypervisor binary.
///
/// Share it between the build orchestrator and the cancellation watcher
/// through an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct HypervisorDriver {
    options: DriverOptions,
    supervisor: Supervisor,
}

impl HypervisorDriver {
    pub fn new(options: DriverOptions) -> DriverResult<Self> {
        options.validate()?;
        let supervisor = Supervisor::new(options.startup_grace(), options.drain_flush());
        Ok(Self {
            options,
            supervisor,
        })
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// PID of the running VM process.
    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Exit notification of the running VM process.
    pub fn completion(&self) -> Option<CompletionSignal> {
        self.supervisor.completion()
    }
}

#[async_trait]
impl Driver for HypervisorDriver {
    async fn copy(&self, source: &Path, destination: &Path) -> DriverResult<()> {
        copy_image(source, destination).await?;
        Ok(())
    }

    fn stop(&self) -> DriverResult<()> {
        self.supervisor.stop()
    }

    async fn launch(&self, args: &[String]) -> DriverResult<()> {
        self.supervisor
            .launch(&self.options.hypervisor_path, args)
            .await
    }

    async fn wait_for_shutdown(&self, cancel: &CancellationToken) -> bool {
        self.supervisor.wait_for_shutdown(cancel).await
    }

    async fn run_image_tool(&self, args: &[String]) -> DriverResult<CommandOutput> {
        run_to_completion(&self.options.image_tool_path, args).await
    }

    fn verify(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn version(&self) -> DriverResult<String> {
        let output = run_to_completion(
            &self.options.hypervisor_path,
            std::slice::from_ref(&self.options.version_flag),
        )
        .await?;
        tracing::debug!(banner = %output.stdout, "Hypervisor version output");

        let version = parse_version(&output.stdout)?;
        tracing::info!(version = %version, "Hypervisor version");
        Ok(version)
    }
}

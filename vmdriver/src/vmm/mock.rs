//! Recording `Driver` double for build-step tests.

use super::runner::CommandOutput;
use super::Driver;
use crate::errors::{DriverError, DriverResult};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Calls seen and results to hand back. Errors are taken (not cloned) when
/// returned, so script each error once.
#[derive(Debug, Default)]
pub struct MockDriverState {
    pub copy_calls: Vec<(PathBuf, PathBuf)>,
    pub copy_err: Option<DriverError>,

    pub stop_called: bool,
    pub stop_err: Option<DriverError>,

    /// Argument list of every `launch` call.
    pub launch_calls: Vec<Vec<String>>,
    /// Error for the n-th `launch` call (by index); `None` or missing means success.
    pub launch_errs: Vec<Option<DriverError>>,

    pub wait_for_shutdown_called: bool,
    pub wait_for_shutdown_state: bool,

    pub image_tool_calls: Vec<Vec<String>>,
    pub image_tool_errs: Vec<Option<DriverError>>,

    pub verify_called: bool,
    pub verify_err: Option<DriverError>,

    pub version_called: bool,
    pub version_result: String,
    pub version_err: Option<DriverError>,
}

#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<MockDriverState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect recorded calls or script results.
    pub fn state(&self) -> MutexGuard<'_, MockDriverState> {
        self.state.lock()
    }
}

fn take_indexed(errs: &mut [Option<DriverError>], call_index: usize) -> DriverResult<()> {
    match errs.get_mut(call_index).and_then(Option::take) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn take_err(err: &mut Option<DriverError>) -> DriverResult<()> {
    err.take().map_or(Ok(()), Err)
}

#[async_trait]
impl Driver for MockDriver {
    async fn copy(&self, source: &Path, destination: &Path) -> DriverResult<()> {
        let mut state = self.state.lock();
        state
            .copy_calls
            .push((source.to_path_buf(), destination.to_path_buf()));
        take_err(&mut state.copy_err)
    }

    fn stop(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.stop_called = true;
        take_err(&mut state.stop_err)
    }

    async fn launch(&self, args: &[String]) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.launch_calls.push(args.to_vec());
        let index = state.launch_calls.len() - 1;
        take_indexed(&mut state.launch_errs, index)
    }

    async fn wait_for_shutdown(&self, _cancel: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        state.wait_for_shutdown_called = true;
        state.wait_for_shutdown_state
    }

    async fn run_image_tool(&self, args: &[String]) -> DriverResult<CommandOutput> {
        let mut state = self.state.lock();
        state.image_tool_calls.push(args.to_vec());
        let index = state.image_tool_calls.len() - 1;
        take_indexed(&mut state.image_tool_errs, index)?;
        Ok(CommandOutput::default())
    }

    fn verify(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.verify_called = true;
        take_err(&mut state.verify_err)
    }

    async fn version(&self) -> DriverResult<String> {
        let mut state = self.state.lock();
        state.version_called = true;
        take_err(&mut state.version_err)?;
        Ok(state.version_result.clone())
    }
}

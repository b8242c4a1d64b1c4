//! Hypervisor process driver for image-building pipelines.
//!
//! `vmdriver` launches a VM through an external hypervisor binary, tells the
//! caller whether it survived startup, lets other tasks wait for (or give up
//! waiting for) its shutdown, and kills it on request. It also runs the
//! companion disk image tool and probes the hypervisor version.
//!
//! ```no_run
//! use vmdriver::{Driver, DriverOptions, HypervisorDriver};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> vmdriver::DriverResult<()> {
//! let driver = HypervisorDriver::new(DriverOptions::default())?;
//! let args: Vec<String> = ["-m", "1024", "-nographic"]
//!     .iter()
//!     .map(|arg| arg.to_string())
//!     .collect();
//! driver.launch(&args).await?;
//!
//! let cancel = CancellationToken::new();
//! if !driver.wait_for_shutdown(&cancel).await {
//!     driver.stop()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod logging;
pub mod options;
pub mod util;
pub mod vmm;

pub use errors::{DriverError, DriverResult};
pub use logging::init_logging;
pub use options::{DriverOptions, LoggingOptions};
pub use vmm::{
    CommandOutput, CompletionSignal, Driver, HypervisorDriver, MockDriver, ProcessHandle,
    Supervisor,
};

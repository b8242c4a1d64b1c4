//! Command-line front end for the hypervisor driver.
//!
//! Mostly useful for checking a host before wiring the driver into a build:
//! which hypervisor version is installed, whether a given argument list
//! boots, and whether the image tool accepts a conversion.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vmdriver::{Driver, DriverOptions, HypervisorDriver, init_logging};

#[derive(Parser, Debug)]
#[command(name = "vmdriver", version, about = "Launch and supervise hypervisor processes")]
struct Cli {
    /// JSON driver configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hypervisor binary (overrides config and VMDRIVER_HYPERVISOR)
    #[arg(long, global = true)]
    hypervisor: Option<PathBuf>,

    /// Image tool binary (overrides config and VMDRIVER_IMAGE_TOOL)
    #[arg(long, global = true)]
    image_tool: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the installed hypervisor version
    Version,
    /// Check the driver environment
    Verify,
    /// Launch the hypervisor and wait for it to shut down (Ctrl-C kills it)
    Run {
        /// Arguments passed to the hypervisor
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Run the image tool to completion
    Img {
        /// Arguments passed to the image tool
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Copy a disk image that needs no conversion
    Copy { source: PathBuf, destination: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut options = match &cli.config {
        Some(path) => DriverOptions::from_json_file(path)?,
        None => DriverOptions::default(),
    }
    .apply_env()?;
    if let Some(path) = cli.hypervisor {
        options.hypervisor_path = path;
    }
    if let Some(path) = cli.image_tool {
        options.image_tool_path = path;
    }

    init_logging(&options.logging)?;
    let driver = Arc::new(HypervisorDriver::new(options)?);

    match cli.command {
        Command::Version => {
            println!("{}", driver.version().await?);
        }
        Command::Verify => {
            driver.verify()?;
            println!("ok");
        }
        Command::Run { args } => run(driver, &args).await?,
        Command::Img { args } => {
            let output = driver.run_image_tool(&args).await?;
            if !output.stdout.is_empty() {
                println!("{}", output.stdout);
            }
        }
        Command::Copy {
            source,
            destination,
        } => {
            driver
                .copy(&source, &destination)
                .await
                .with_context(|| format!("copy {} failed", source.display()))?;
        }
    }

    Ok(())
}

async fn run(driver: Arc<HypervisorDriver>, args: &[String]) -> anyhow::Result<()> {
    driver.launch(args).await?;
    let completion = driver.completion();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping VM");
            on_interrupt.cancel();
        }
    });

    if !driver.wait_for_shutdown(&cancel).await {
        driver.stop()?;
        driver.wait_for_shutdown(&CancellationToken::new()).await;
    }

    if let Some(completion) = completion {
        let exit_code = completion.wait().await;
        tracing::info!(exit_code, "VM shut down");
        if exit_code != 0 {
            anyhow::bail!("hypervisor exited with code {}", exit_code);
        }
    }
    Ok(())
}

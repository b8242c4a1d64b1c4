//! Run short-lived helper commands to completion.

use crate::errors::{DriverError, DriverResult};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Trimmed standard output.
    pub stdout: String,
    /// Trimmed standard error.
    pub stderr: String,
}

/// Run `program` with `args`, buffering stdout and stderr in memory.
///
/// A non-zero exit becomes [`DriverError::Runtime`] whose message is exactly
/// the trimmed stderr; callers want the tool's own diagnostics, not the exit
/// status wrapper. Both captures are logged whatever the outcome.
pub async fn run_to_completion(program: &Path, args: &[String]) -> DriverResult<CommandOutput> {
    tracing::info!(program = %program.display(), ?args, "Executing");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            let err_msg = format!("Failed to run {}: {}", program.display(), e);
            tracing::error!("{}", err_msg);
            DriverError::Spawn(err_msg)
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    tracing::info!(program = %program.display(), "stdout: {}", stdout);
    tracing::info!(program = %program.display(), "stderr: {}", stderr);

    if !output.status.success() {
        tracing::warn!(
            program = %program.display(),
            status = %output.status,
            "Command failed"
        );
        return Err(DriverError::Runtime(stderr));
    }

    Ok(CommandOutput { stdout, stderr })
}

//! Supervision of the long-running hypervisor process.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──launch()──► Launching ──grace elapsed──► Running
//!  ▲                     │                           │
//!  └──── reaper ◄────────┴───────────────────────────┘
//! ```
//!
//! Only the reaper moves a lifetime back to `Idle`. As soon as the process
//! is reaped it fulfills the completion signal and clears the state inside
//! one critical section, so anyone who has observed the exit code and then
//! calls `launch` again finds the supervisor idle. Output drains are closed
//! only afterwards.
//!
//! The state lock is never held across an await. Waiters take a clone of the
//! completion signal under the lock and block on the clone.

use super::drain::{OutputStream, spawn_drain};
use super::signal::{CompletionSignal, completion_channel};
use crate::errors::{DriverError, DriverResult, VERBOSE_HINT};
use crate::util::{UNKNOWN_EXIT_CODE, exit_code, kill_process};
use parking_lot::Mutex;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The process currently tracked by a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    generation: u64,
    completion: CompletionSignal,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }
}

#[derive(Debug)]
enum Lifecycle {
    Idle,
    /// Spawned, still inside the startup grace window. Already stoppable.
    Launching(ProcessHandle),
    Running(ProcessHandle),
}

impl Lifecycle {
    fn tracked(&self) -> Option<&ProcessHandle> {
        match self {
            Lifecycle::Idle => None,
            Lifecycle::Launching(handle) | Lifecycle::Running(handle) => Some(handle),
        }
    }
}

#[derive(Debug)]
struct SupervisorState {
    lifecycle: Lifecycle,
    /// Incremented per launch so a late reaper never clears a newer lifetime.
    generation: u64,
}

impl SupervisorState {
    fn is_current(&self, generation: u64) -> bool {
        self.lifecycle
            .tracked()
            .is_some_and(|handle| handle.generation == generation)
    }
}

/// Owns zero or one supervised process at a time.
#[derive(Debug)]
pub struct Supervisor {
    state: Arc<Mutex<SupervisorState>>,
    startup_grace: Duration,
    drain_flush: Duration,
}

impl Supervisor {
    pub fn new(startup_grace: Duration, drain_flush: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(SupervisorState {
                lifecycle: Lifecycle::Idle,
                generation: 0,
            })),
            startup_grace,
            drain_flush,
        }
    }

    /// Launch `program` and wait out the startup grace period.
    ///
    /// Returns once the process has survived the grace window; its output
    /// keeps flowing to the log and its exit is reported through
    /// [`Supervisor::completion`]. During the window the process can already
    /// be stopped and waited on.
    ///
    /// # Errors
    /// * [`DriverError::Spawn`] - the binary could not be started
    /// * [`DriverError::Startup`] - the process exited inside the grace window,
    ///   with any exit code (a VM that exits cleanly right away is also broken)
    ///
    /// # Panics
    /// If a process is already launching or running. That means the calling
    /// state machine lost track of the VM and must not be papered over.
    pub async fn launch(&self, program: &Path, args: &[String]) -> DriverResult<()> {
        let (mut child, handle, sender) = {
            let mut state = self.state.lock();
            if !matches!(state.lifecycle, Lifecycle::Idle) {
                panic!("Existing VM state found: {:?}", state.lifecycle);
            }

            tracing::info!(program = %program.display(), ?args, "Executing hypervisor");
            let child = spawn_child(program, args)?;
            let Some(pid) = child.id() else {
                return Err(DriverError::Internal(format!(
                    "VM process {} has no pid right after spawn",
                    program.display()
                )));
            };

            state.generation += 1;
            let (sender, completion) = completion_channel();
            let handle = ProcessHandle {
                pid,
                generation: state.generation,
                completion,
            };
            state.lifecycle = Lifecycle::Launching(handle.clone());
            (child, handle, sender)
        };
        let pid = handle.pid;
        let generation = handle.generation;

        let name = program.display().to_string();
        let drains: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| spawn_drain(name.clone(), OutputStream::Stdout, out)),
            child
                .stderr
                .take()
                .map(|err| spawn_drain(name.clone(), OutputStream::Stderr, err)),
        ]
        .into_iter()
        .flatten()
        .collect();

        tracing::info!(pid, "Started hypervisor");

        let state = Arc::clone(&self.state);
        let drain_flush = self.drain_flush;
        tokio::spawn(async move {
            let exit_code = reap(child, pid).await;
            {
                let mut state = state.lock();
                sender.fulfill(exit_code);
                if state.is_current(generation) {
                    state.lifecycle = Lifecycle::Idle;
                }
            }
            close_drains(drains, drain_flush).await;
        });

        let pending = PendingLaunch {
            state: &self.state,
            generation: Some(generation),
        };

        // Give the hypervisor a moment to fail on bad arguments or images.
        tokio::select! {
            biased;
            exit_code = handle.completion.wait() => {
                drop(pending);
                if exit_code == 0 {
                    tracing::warn!(pid, "Hypervisor exited cleanly during startup");
                    Err(DriverError::Startup(format!(
                        "VM process exited immediately with status 0 instead of running. {}",
                        VERBOSE_HINT
                    )))
                } else {
                    tracing::error!(pid, exit_code, "Hypervisor failed to start");
                    Err(DriverError::Startup(format!(
                        "VM process failed to start (exit code {}). {}",
                        exit_code, VERBOSE_HINT
                    )))
                }
            }
            _ = tokio::time::sleep(self.startup_grace) => {
                pending.publish();
                Ok(())
            }
        }
    }

    /// Wait until the tracked process exits or `cancel` fires.
    ///
    /// Returns `true` if the process has shut down (or nothing is tracked),
    /// `false` if the wait was cancelled first. Cancelling never touches the
    /// process itself. A process still inside its startup window is waited on
    /// like a running one.
    pub async fn wait_for_shutdown(&self, cancel: &CancellationToken) -> bool {
        let completion = {
            let state = self.state.lock();
            match state.lifecycle.tracked() {
                Some(handle) => handle.completion.clone(),
                None => return true,
            }
        };

        tokio::select! {
            biased;
            _ = completion.wait() => true,
            _ = cancel.cancelled() => false,
        }
    }

    /// Forcefully kill the tracked process, running or still launching.
    ///
    /// No-op when nothing is tracked. The handle stays in place until the
    /// reaper observes the exit.
    pub fn stop(&self) -> DriverResult<()> {
        let state = self.state.lock();
        if let Some(handle) = state.lifecycle.tracked() {
            tracing::info!(pid = handle.pid, "Killing VM process");
            kill_process(handle.pid).map_err(|e| {
                DriverError::Termination(format!(
                    "Failed to kill VM process {}: {}",
                    handle.pid, e
                ))
            })?;
        }
        Ok(())
    }

    /// Snapshot of the tracked process, once it has survived startup.
    pub fn handle(&self) -> Option<ProcessHandle> {
        match &self.state.lock().lifecycle {
            Lifecycle::Running(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn completion(&self) -> Option<CompletionSignal> {
        self.handle().map(|handle| handle.completion)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle().map(|handle| handle.pid)
    }

    pub fn is_running(&self) -> bool {
        self.handle().is_some()
    }
}

/// Promotes a launching process to running.
///
/// Publishing also happens on drop, so a caller that abandons `launch`
/// mid-grace still leaves the process reported as running. Publishing is a
/// no-op once the reaper has cleared the lifetime.
struct PendingLaunch<'a> {
    state: &'a Mutex<SupervisorState>,
    generation: Option<u64>,
}

impl PendingLaunch<'_> {
    fn publish(mut self) {
        self.publish_inner();
    }

    fn publish_inner(&mut self) {
        let Some(generation) = self.generation.take() else {
            return;
        };
        let mut state = self.state.lock();
        let lifecycle = std::mem::replace(&mut state.lifecycle, Lifecycle::Idle);
        state.lifecycle = match lifecycle {
            Lifecycle::Launching(handle) if handle.generation == generation => {
                Lifecycle::Running(handle)
            }
            other => other,
        };
    }
}

impl Drop for PendingLaunch<'_> {
    fn drop(&mut self) {
        self.publish_inner();
    }
}

fn spawn_child(program: &Path, args: &[String]) -> DriverResult<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn().map_err(|e| {
        let err_msg = format!(
            "Error starting VM process {}: {}. {}",
            program.display(),
            e,
            VERBOSE_HINT
        );
        tracing::error!("{}", err_msg);
        DriverError::Spawn(err_msg)
    })
}

async fn reap(mut child: Child, pid: u32) -> i32 {
    let exit_code = match child.wait().await {
        Ok(status) => exit_code(&status),
        Err(e) => {
            tracing::warn!(pid, error = %e, "Failed to wait on VM process");
            UNKNOWN_EXIT_CODE
        }
    };
    tracing::info!(pid, exit_code, "VM process exited");
    exit_code
}

/// Let drains flush what the process wrote, then drop the read ends.
///
/// Runs after the exit has been reported. A grandchild that inherited the
/// pipes can keep them open forever, so the drains get one shared deadline.
async fn close_drains(drains: Vec<JoinHandle<()>>, flush: Duration) {
    let deadline = tokio::time::Instant::now() + flush;
    for mut drain in drains {
        if tokio::time::timeout_at(deadline, &mut drain).await.is_err() {
            tracing::debug!("Output drain still open after VM exit, closing it");
            drain.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::is_process_alive;
    use std::path::PathBuf;

    const GRACE: Duration = Duration::from_millis(300);
    const FLUSH: Duration = Duration::from_millis(200);

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn script(body: &str) -> Vec<String> {
        vec!["-c".to_string(), body.to_string()]
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(GRACE, FLUSH)
    }

    #[tokio::test]
    async fn test_quick_clean_exit_is_startup_failure() {
        let supervisor = supervisor();

        let err = supervisor.launch(&sh(), &script("exit 0")).await.unwrap_err();

        assert!(matches!(err, DriverError::Startup(_)));
        assert!(err.to_string().contains("status 0"));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_quick_failure_carries_guidance() {
        let supervisor = supervisor();

        let err = supervisor
            .launch(&sh(), &script("echo 'could not open disk image' >&2; exit 3"))
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::Startup(_)));
        let msg = err.to_string();
        assert!(msg.contains("exit code 3"));
        assert!(msg.contains("RUST_LOG"));
        assert!(supervisor.completion().is_none());
    }

    #[tokio::test]
    async fn test_relaunch_after_startup_failure() {
        let supervisor = supervisor();

        assert!(supervisor.launch(&sh(), &script("exit 1")).await.is_err());
        // Must not trip the double-launch assertion.
        assert!(supervisor.launch(&sh(), &script("exit 1")).await.is_err());
    }

    #[tokio::test]
    async fn test_running_process_is_published() {
        let supervisor = supervisor();

        supervisor
            .launch(&sh(), &script("echo booting; exec sleep 30"))
            .await
            .unwrap();

        let handle = supervisor.handle().unwrap();
        assert!(is_process_alive(handle.pid()));
        assert_eq!(supervisor.pid(), Some(handle.pid()));
        assert!(!handle.completion().is_fulfilled());

        supervisor.stop().unwrap();
        assert!(supervisor.wait_for_shutdown(&CancellationToken::new()).await);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_wait_without_process_returns_immediately() {
        let supervisor = supervisor();

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            supervisor.wait_for_shutdown(&CancellationToken::new()),
        )
        .await;

        assert_eq!(result.ok(), Some(true));
    }

    #[tokio::test]
    async fn test_cancelled_wait_leaves_process_running() {
        let supervisor = supervisor();
        supervisor
            .launch(&sh(), &script("exec sleep 30"))
            .await
            .unwrap();
        let pid = supervisor.pid().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!supervisor.wait_for_shutdown(&cancel).await);

        assert!(supervisor.is_running());
        assert!(is_process_alive(pid));

        supervisor.stop().unwrap();
        assert!(supervisor.wait_for_shutdown(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let supervisor = supervisor();
        supervisor
            .launch(&sh(), &script("exec sleep 30"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        assert!(!supervisor.wait_for_shutdown(&cancel).await);
        assert!(supervisor.is_running());

        supervisor.stop().unwrap();
        assert!(supervisor.wait_for_shutdown(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_exit_after_grace_is_reported() {
        let supervisor = supervisor();
        supervisor
            .launch(&sh(), &script("sleep 1; exit 7"))
            .await
            .unwrap();
        let completion = supervisor.completion().unwrap();

        assert!(supervisor.wait_for_shutdown(&CancellationToken::new()).await);
        assert_eq!(completion.wait().await, 7);
        assert_eq!(completion.exit_code(), Some(7));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_relaunch_after_observed_exit() {
        let supervisor = supervisor();
        supervisor
            .launch(&sh(), &script("exec sleep 30"))
            .await
            .unwrap();
        supervisor.stop().unwrap();
        assert!(supervisor.wait_for_shutdown(&CancellationToken::new()).await);

        supervisor
            .launch(&sh(), &script("exec sleep 30"))
            .await
            .unwrap();
        assert!(supervisor.is_running());

        supervisor.stop().unwrap();
        assert!(supervisor.wait_for_shutdown(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_killed_process_reports_unknown_exit_code() {
        let supervisor = supervisor();
        supervisor
            .launch(&sh(), &script("exec sleep 30"))
            .await
            .unwrap();
        let completion = supervisor.completion().unwrap();

        supervisor.stop().unwrap();

        assert_eq!(completion.wait().await, UNKNOWN_EXIT_CODE);
    }

    #[test]
    fn test_stop_without_process_is_noop() {
        let supervisor = supervisor();
        supervisor.stop().unwrap();
        supervisor.stop().unwrap();
    }

    #[tokio::test]
    async fn test_stop_twice_does_not_deadlock() {
        let supervisor = supervisor();
        supervisor
            .launch(&sh(), &script("exec sleep 30"))
            .await
            .unwrap();

        supervisor.stop().unwrap();
        // The process may already be reaped; either outcome is fine.
        let _ = supervisor.stop();

        let shut_down = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.wait_for_shutdown(&CancellationToken::new()),
        )
        .await;
        assert_eq!(shut_down.ok(), Some(true));
    }

    #[tokio::test]
    async fn test_spawn_failure_resets_state() {
        let supervisor = supervisor();
        let missing = PathBuf::from("/nonexistent/qemu-system-x86_64");

        let err = supervisor.launch(&missing, &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::Spawn(_)));
        assert!(err.to_string().contains("/nonexistent/qemu-system-x86_64"));

        let err = supervisor.launch(&missing, &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_grandchild_holding_pipes_does_not_block_completion() {
        let supervisor = supervisor();
        // The background sleep inherits stdout and outlives the shell.
        supervisor
            .launch(&sh(), &script("sleep 30 & sleep 1; exit 0"))
            .await
            .unwrap();
        let completion = supervisor.completion().unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), completion.wait()).await;
        assert_eq!(code.ok(), Some(0));
    }

    #[tokio::test]
    async fn test_startup_failure_not_delayed_by_inherited_pipes() {
        // Flush window far longer than the grace period.
        let supervisor = Supervisor::new(GRACE, Duration::from_secs(2));

        let err = supervisor
            .launch(&sh(), &script("sleep 5 & sleep 0.1; exit 3"))
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::Startup(_)));
        assert!(err.to_string().contains("exit code 3"));
    }

    #[tokio::test]
    async fn test_exit_clears_state_before_drains_close() {
        let supervisor = Supervisor::new(GRACE, Duration::from_millis(1500));
        supervisor
            .launch(&sh(), &script("sleep 5 & sleep 0.5; exit 0"))
            .await
            .unwrap();
        let completion = supervisor.completion().unwrap();

        let code = tokio::time::timeout(Duration::from_millis(1000), completion.wait()).await;
        assert_eq!(code.ok(), Some(0));

        assert!(!supervisor.is_running());
        assert_eq!(supervisor.pid(), None);
        // Nothing is published, so there is no stale pid to signal.
        supervisor.stop().unwrap();
    }

    #[tokio::test]
    async fn test_stop_and_wait_during_startup_window() {
        let supervisor = Arc::new(Supervisor::new(Duration::from_millis(500), FLUSH));
        let launcher = Arc::clone(&supervisor);
        let launch =
            tokio::spawn(async move { launcher.launch(&sh(), &script("exec sleep 30")).await });

        tokio::time::sleep(Duration::from_millis(100)).await;

        // A live process inside its grace window is not "already shut down".
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(!supervisor.wait_for_shutdown(&cancelled).await);
        assert!(!supervisor.is_running());

        supervisor.stop().unwrap();
        let shut_down = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.wait_for_shutdown(&CancellationToken::new()),
        )
        .await;
        assert_eq!(shut_down.ok(), Some(true));

        let err = launch.await.unwrap().unwrap_err();
        assert!(matches!(err, DriverError::Startup(_)));
        assert!(err.to_string().contains(&format!("exit code {}", UNKNOWN_EXIT_CODE)));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    #[should_panic(expected = "Existing VM state found")]
    async fn test_double_launch_panics() {
        let supervisor = supervisor();
        supervisor
            .launch(&sh(), &script("exec sleep 30"))
            .await
            .unwrap();

        let _ = supervisor.launch(&sh(), &script("exec sleep 30")).await;
    }
}

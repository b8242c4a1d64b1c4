//! Process signalling and exit status helpers.

use std::process::ExitStatus;

/// Exit code reported when the real status cannot be determined
/// (killed by a signal, or waiting on the child failed).
pub const UNKNOWN_EXIT_CODE: i32 = 254;

/// Send SIGKILL to a process.
///
/// Unlike a liveness probe this reports the OS error, so callers can tell a
/// process that is already gone (`ESRCH`) from one they may not signal
/// (`EPERM`).
pub fn kill_process(pid: u32) -> std::io::Result<()> {
    if unsafe { libc::kill(pid as i32, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
/// Zombies that have not been reaped yet still count as alive.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Map an exit status to the integer code delivered on the completion signal.
///
/// * clean exit - `0`
/// * non-zero exit - the reported code
/// * terminated by a signal - [`UNKNOWN_EXIT_CODE`]
pub fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_is_process_alive_current() {
        let current_pid = std::process::id();
        assert!(is_process_alive(current_pid));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(888888888));
    }

    #[test]
    fn test_kill_missing_process_reports_error() {
        let err = kill_process(999999999).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }

    #[test]
    fn test_exit_code_mapping() {
        // Raw wait statuses: exit code lives in the high byte, signal in the low bits.
        assert_eq!(exit_code(&ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(&ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(
            exit_code(&ExitStatus::from_raw(libc::SIGKILL)),
            UNKNOWN_EXIT_CODE
        );
    }
}

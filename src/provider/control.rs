//! Signal delivery for locally spawned servers.
//!
//! Children are started in their own process group, so a forced kill takes
//! any helper processes (wrapper scripts, the JVM) down with them.

use crate::error::{AppError, Result};

/// Ask a process to shut down.
#[cfg(unix)]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| AppError::backend(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

/// SIGKILL the whole process group, falling back to the single PID.
#[cfg(unix)]
pub(super) fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::backend(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::backend(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

#[cfg(not(unix))]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    Err(AppError::backend(format!(
        "Cannot signal PID {pid} on this platform"
    )))
}

/// Without process groups the waiter task kills the direct child instead.
#[cfg(not(unix))]
pub(super) fn force_kill(pid: u32) -> Result<()> {
    Err(AppError::backend(format!(
        "Cannot signal PID {pid} on this platform"
    )))
}

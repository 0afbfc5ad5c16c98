//! Worker process management — spawn `jobq worker run` children, track their
//! PIDs, and deliver graceful shutdown requests.
//!
//! This is process-level plumbing around the core: the only contract with the
//! worker loop is that the delivered signal trips its shutdown flag.

use std::path::Path;
use std::process::Stdio;

use tracing::{info, warn};

use crate::error::Error;

/// Default PID file, resolved against the working directory.
pub const PID_FILE: &str = "workers.pid";

/// Spawn `count` detached worker processes running `jobq worker run` and
/// record their PIDs in `pid_file`. Children inherit the working directory,
/// so they share the same config and database.
pub fn start_workers(count: u32, pid_file: &Path) -> Result<Vec<u32>, Error> {
    let exe = std::env::current_exe()?;
    let mut pids = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let child = std::process::Command::new(&exe)
            .args(["worker", "run"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!(pid = child.id(), "Started worker process");
        pids.push(child.id());
    }

    let contents = pids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(pid_file, contents)?;
    Ok(pids)
}

/// Outcome of signalling one recorded worker PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopResult {
    Signalled(u32),
    NotRunning(u32),
}

/// Read `pid_file`, deliver a graceful shutdown request to each recorded
/// worker, and remove the file. Returns `None` if no PID file exists.
pub fn stop_workers(pid_file: &Path) -> Result<Option<Vec<StopResult>>, Error> {
    if !pid_file.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(pid_file)?;
    let mut results = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(pid) = line.parse::<u32>() else {
            warn!(entry = line, "Skipping malformed PID file entry");
            continue;
        };
        if signal_terminate(pid) {
            info!(pid, "Sent shutdown signal to worker");
            results.push(StopResult::Signalled(pid));
        } else {
            info!(pid, "Worker not running (already stopped)");
            results.push(StopResult::NotRunning(pid));
        }
    }

    std::fs::remove_file(pid_file)?;
    Ok(Some(results))
}

/// Deliver SIGTERM (unix) or a taskkill request (windows) to `pid`.
/// Returns false if the process does not exist.
#[cfg(unix)]
fn signal_terminate(pid: u32) -> bool {
    // SAFETY: kill with a valid signal number has no memory-safety
    // preconditions; it fails with ESRCH for unknown PIDs.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(windows)]
fn signal_terminate(pid: u32) -> bool {
    std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_pid_file_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("workers.pid");
        assert_eq!(stop_workers(&pid_file).unwrap(), None);
    }

    #[test]
    fn stop_reports_dead_pids_and_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("workers.pid");
        // i32::MAX is far beyond any real pid space but still a valid pid_t.
        std::fs::write(&pid_file, "2147483647\nnot-a-pid\n").unwrap();

        let results = stop_workers(&pid_file).unwrap().unwrap();
        assert_eq!(results, vec![StopResult::NotRunning(2147483647)]);
        assert!(!pid_file.exists());
    }
}

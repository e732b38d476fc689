//! Supervision of the optional local server process.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{io_err, DaemonError};

/// Starts and stops the server rooted at a data directory.
pub trait ProcessSupervisor: Send + Sync {
    /// Returns `Ok(false)` when the server reported a failed start.
    fn start(&self, directory: &Path) -> Result<bool, DaemonError>;

    fn stop(&self, directory: &Path) -> Result<(), DaemonError>;
}

/// Drives the server through its own executable: `<binary> start <dir>` and
/// `<binary> stop <dir>`.
#[derive(Debug, Clone)]
pub struct CommandSupervisor {
    binary: PathBuf,
}

impl CommandSupervisor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, action: &str, directory: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg(action).arg(directory);
        command
    }
}

impl ProcessSupervisor for CommandSupervisor {
    #[cfg(not(windows))]
    fn start(&self, directory: &Path) -> Result<bool, DaemonError> {
        let status = self
            .command("start", directory)
            .status()
            .map_err(|e| io_err(&self.binary, e))?;
        Ok(status.success())
    }

    // The detached launch used on Windows cannot report an exit code, so a
    // successful spawn counts as a successful start.
    #[cfg(windows)]
    fn start(&self, directory: &Path) -> Result<bool, DaemonError> {
        self.command("start", directory)
            .spawn()
            .map_err(|e| io_err(&self.binary, e))?;
        Ok(true)
    }

    fn stop(&self, directory: &Path) -> Result<(), DaemonError> {
        let output = self
            .command("stop", directory)
            .output()
            .map_err(|e| io_err(&self.binary, e))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(DaemonError::LocalServer(format!(
            "stop failed (status {}): {stderr}",
            output.status
        )))
    }
}

/// Result of a best-effort server shutdown. Never an error for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    Failed(String),
}

/// Tracks whether the local server is believed to be running.
pub struct LocalServerSupervisor {
    directory: PathBuf,
    process: Arc<dyn ProcessSupervisor>,
    running: AtomicBool,
}

impl LocalServerSupervisor {
    pub fn new(directory: impl Into<PathBuf>, process: Arc<dyn ProcessSupervisor>) -> Self {
        Self {
            directory: directory.into(),
            process,
            running: AtomicBool::new(false),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the server if `run_local` is set and it is not already running.
    ///
    /// The running flag is claimed before the launch so a slow start is not
    /// retried concurrently; it is released again if the launch fails.
    /// Returns whether this call started the server.
    pub fn ensure_started(&self, run_local: bool) -> bool {
        if !run_local {
            return false;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        tracing::info!(dir = %self.directory.display(), "starting local server");
        match self.process.start(&self.directory) {
            Ok(true) => true,
            Ok(false) => {
                tracing::error!(dir = %self.directory.display(), "local server reported a failed start");
                self.running.store(false, Ordering::SeqCst);
                false
            }
            Err(err) => {
                tracing::error!(dir = %self.directory.display(), error = %err, "local server failed to start");
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Best-effort shutdown. Failures are logged and reported in the outcome.
    pub fn ensure_stopped(&self, run_local: bool) -> StopOutcome {
        if !run_local || !self.is_running() {
            return StopOutcome::NotRunning;
        }

        tracing::info!(dir = %self.directory.display(), "shutting down local server");
        let outcome = match self.process.stop(&self.directory) {
            Ok(()) => StopOutcome::Stopped,
            Err(err) => {
                tracing::warn!(error = %err, "local server shutdown failed");
                StopOutcome::Failed(err.to_string())
            }
        };
        self.running.store(false, Ordering::SeqCst);
        outcome
    }
}

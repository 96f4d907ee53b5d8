//! Supervision of the tor child process

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{TorError, TorResult};

/// Upper bound for `tor --version` to answer
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that `tor_path` is a working tor executable.
///
/// Runs `<tor_path> --version` and requires a successful exit. Returns the
/// first line of its output (the version banner).
pub async fn check_installation(tor_path: &Path) -> TorResult<String> {
    let not_installed = |reason: String| TorError::NotInstalled {
        path: tor_path.to_path_buf(),
        reason,
    };

    let mut command = Command::new(tor_path);
    command
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(VERSION_CHECK_TIMEOUT, command.output())
        .await
        .map_err(|_| not_installed("`--version` did not finish in time".to_string()))?
        .map_err(|e| not_installed(e.to_string()))?;

    if !output.status.success() {
        return Err(not_installed(format!("`--version` exited with {}", output.status)));
    }

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    debug!(path = %tor_path.display(), version = %version, "Tor installation found");
    Ok(version)
}

/// Handle to the running tor process
///
/// Owns the child exclusively. The process is killed exactly once: by
/// [`TorProcess::terminate`], or when the handle is dropped on any other
/// exit path.
#[derive(Debug)]
pub struct TorProcess {
    child: Option<Child>,
    pid: Option<u32>,
    tor_path: PathBuf,
}

impl TorProcess {
    /// Start `<tor_path> -f <torrc_path>`.
    ///
    /// Tor's stdout and stderr are inherited so its bootstrap log reaches
    /// the operator's console.
    pub fn spawn(tor_path: &Path, torrc_path: &Path) -> TorResult<Self> {
        let child = Command::new(tor_path)
            .arg("-f")
            .arg(torrc_path)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| TorError::Spawn {
                path: tor_path.to_path_buf(),
                source,
            })?;

        let pid = child.id();
        info!(pid = ?pid, torrc = %torrc_path.display(), "Tor process started");

        Ok(Self {
            child: Some(child),
            pid,
            tor_path: tor_path.to_path_buf(),
        })
    }

    /// OS process id, as observed at spawn time
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Check if the tor process is still running
    pub fn is_running(&mut self) -> bool {
        if let Some(ref mut child) = self.child {
            matches!(child.try_wait(), Ok(None))
        } else {
            false
        }
    }

    /// Kill the tor process and reap it.
    ///
    /// Sends an immediate kill; tor is not given a chance to exit on its own.
    /// Returns `Ok(false)` if the process had already been terminated by an
    /// earlier call.
    pub async fn terminate(&mut self) -> io::Result<bool> {
        let Some(mut child) = self.child.take() else {
            return Ok(false);
        };

        match child.try_wait()? {
            Some(status) => {
                warn!(pid = ?self.pid, %status, "Tor process had already exited");
            }
            None => {
                child.start_kill()?;
                let status = child.wait().await?;
                debug!(pid = ?self.pid, %status, "Tor process killed");
            }
        }

        Ok(true)
    }
}

impl Drop for TorProcess {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child.take() {
            warn!(
                pid = ?self.pid,
                path = %self.tor_path.display(),
                "Tor process still running at drop, killing it"
            );
            // tokio reaps dropped children in the background
            let _ = child.start_kill();
        }
    }
}

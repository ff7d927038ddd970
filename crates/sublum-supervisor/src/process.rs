//! Spawns the upstream MCP server as the leader of its own process group
//! and tears the whole group down on shutdown (spec.md §4.7).
//!
//! Grounded in `abp-host`/`sidecar-kit`'s `Command::new().stdin(piped)...`
//! spawn shape, generalized with `process_group(0)` so a signal sent to
//! `-pid` reaches every process the upstream server itself forks, not just
//! the immediate child.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::warn;

/// Everything needed to spawn the upstream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Environment variables for the child only (spec.md §4.5: this is
    /// where resolved secrets land).
    pub env: BTreeMap<String, String>,
    /// Working directory, if not the shim's own.
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    /// A bare spec with no arguments, environment, or working directory.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), args: Vec::new(), env: BTreeMap::new(), cwd: None }
    }
}

/// Runtime status of the supervised process, mirrored from `abp-host`'s
/// `ProcessStatus` and extended with `Draining` for the grace-period state
/// between a shutdown signal and a confirmed exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not yet spawned.
    NotStarted,
    /// Spawned and presumed alive.
    Running {
        /// OS process id of the group leader.
        pid: i32,
    },
    /// SIGTERM sent to the group; waiting out the grace period.
    Draining,
    /// Exited on its own, with the given code if available (`None` means
    /// it was killed by a signal rather than exiting normally).
    Exited {
        /// Exit code, if the process terminated normally.
        code: Option<i32>,
    },
    /// Forcibly killed after the grace period elapsed.
    Killed,
}

/// Errors spawning or signaling the upstream process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The process failed to spawn.
    #[error("failed to spawn upstream process: {0}")]
    Spawn(#[source] std::io::Error),
    /// The child's stdin/stdout handle was unexpectedly unavailable.
    #[error("upstream process stdio unavailable: {0}")]
    StdioUnavailable(&'static str),
    /// Waiting on the child failed.
    #[error("failed to wait on upstream process: {0}")]
    Wait(#[source] std::io::Error),
    /// Sending a signal to the process group failed.
    #[error("failed to signal upstream process group: {0}")]
    Signal(#[source] nix::Error),
}

/// A spawned upstream server: its process handle plus piped stdio.
pub struct Supervisor {
    child: Child,
    pid: i32,
    /// Upstream's stdin, for the adapter's agent-to-upstream writer task.
    pub stdin: ChildStdin,
    /// Upstream's stdout, for the adapter's upstream-to-agent reader task.
    pub stdout: ChildStdout,
}

impl Supervisor {
    /// Spawn `spec` as the leader of a new process group.
    pub async fn spawn(spec: &ProcessSpec) -> Result<Self, SupervisorError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let pid = child.id().ok_or(SupervisorError::StdioUnavailable("pid"))? as i32;

        let stdin = child.stdin.take().ok_or(SupervisorError::StdioUnavailable("stdin"))?;
        let stdout = child.stdout.take().ok_or(SupervisorError::StdioUnavailable("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        Ok(Self { child, pid, stdin, stdout })
    }

    /// OS process id of the group leader.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Await the child's own exit, without signaling it. Used by the task
    /// that watches for the upstream process dying unprompted.
    pub async fn wait(&mut self) -> Result<ProcessStatus, SupervisorError> {
        let status = self.child.wait().await.map_err(SupervisorError::Wait)?;
        Ok(ProcessStatus::Exited { code: status.code() })
    }

    /// Send `signal` to the whole process group (spec.md §4.7: "the whole
    /// group, not just the immediate child").
    pub fn signal_group(&self, sig: Signal) -> Result<(), SupervisorError> {
        signal::kill(Pid::from_raw(-self.pid), sig).map_err(SupervisorError::Signal)
    }

    /// Graceful shutdown: SIGTERM the group, wait up to `grace`, then
    /// SIGKILL and reap (spec.md §4.7 "Grace period draining", "Guaranteed
    /// reaping — no orphans").
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ProcessStatus, SupervisorError> {
        self.signal_group(Signal::SIGTERM)?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Ok(ProcessStatus::Exited { code: status.code() }),
            Ok(Err(e)) => Err(SupervisorError::Wait(e)),
            Err(_timed_out) => {
                let _ = self.signal_group(Signal::SIGKILL);
                let _ = self.child.wait().await;
                Ok(ProcessStatus::Killed)
            }
        }
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.is_empty() {
                    warn!(target: "subluminal.upstream.stderr", "{line}");
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
}

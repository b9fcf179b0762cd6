use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::{AgentError, Result};

/// How long a terminated process gets to exit on SIGTERM before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

static LAUNCH_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identifier of a supervised process, unique while the process is alive.
///
/// Backed by the OS pid. Nothing outside this module relies on that, so it can
/// be swapped for a counter on platforms without process ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(u32);

impl JobId {
    fn from_pid(pid: u32) -> Self {
        Self(pid)
    }

    fn as_pgid(self) -> Pid {
        Pid::from_raw(self.0 as i32)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Handle to a launched process.
///
/// Cloning is cheap; every clone observes the same exit status, which is
/// published by a reaper task owning the child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: JobId,
    launch: u64,
    program: String,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether both handles refer to the same launch. Two launches can share
    /// a [`JobId`] once the OS recycles a pid.
    pub fn is_same_launch(&self, other: &ProcessHandle) -> bool {
        self.id == other.id && self.launch == other.launch
    }

    /// Handle for a process that has already exited, without spawning anything.
    #[cfg(test)]
    pub(crate) fn exited(pid: u32, outcome: ExitOutcome) -> Self {
        let (_, exit_rx) = watch::channel(Some(outcome));
        Self {
            id: JobId::from_pid(pid),
            launch: LAUNCH_SEQ.fetch_add(1, Ordering::Relaxed),
            program: "test".to_string(),
            exit_rx,
        }
    }

    /// Exit status if the process has already been reaped.
    pub fn try_exit(&self) -> Option<ExitOutcome> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.try_exit().is_some()
    }

    /// Wait until the process exits.
    pub async fn wait(&self) -> ExitOutcome {
        let mut rx = self.exit_rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(state) => *state,
            // Reaper dropped without reporting, only possible during runtime shutdown.
            Err(_) => None,
        };
        outcome.unwrap_or_else(ExitOutcome::unknown)
    }
}

/// Starts and stops child processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(TERMINATE_GRACE)
    }
}

impl ProcessSupervisor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Spawn `argv` in its own process group without waiting for it.
    ///
    /// Output is inherited so the child's logs land in the agent's own log stream.
    pub fn launch(&self, argv: &[String]) -> Result<ProcessHandle> {
        let (program, args) = argv.split_first().ok_or_else(|| AgentError::Launch {
            program: String::new(),
            message: "empty command".to_string(),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| AgentError::Launch {
                program: program.clone(),
                message: if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{} not found. Is it installed and in PATH?", program)
                } else {
                    e.to_string()
                },
            })?;

        let pid = child.id().ok_or_else(|| AgentError::Launch {
            program: program.clone(),
            message: "process exited before its id could be read".to_string(),
        })?;
        let id = JobId::from_pid(pid);

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::from(status),
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Failed to wait on child process");
                    ExitOutcome::unknown()
                }
            };
            tracing::debug!(job_id = %id, outcome = %outcome, "Child process reaped");
            exit_tx.send_replace(Some(outcome));
        });

        tracing::info!(job_id = %id, program = %program, "Process launched");

        Ok(ProcessHandle {
            id,
            launch: LAUNCH_SEQ.fetch_add(1, Ordering::Relaxed),
            program: program.clone(),
            exit_rx,
        })
    }

    /// Stop a process: SIGTERM, then SIGKILL once the grace period runs out.
    ///
    /// Returns immediately for a process that has already exited.
    pub async fn terminate(&self, handle: &ProcessHandle) -> ExitOutcome {
        if let Some(outcome) = handle.try_exit() {
            return outcome;
        }

        let pgid = handle.id().as_pgid();
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            tracing::debug!(job_id = %handle.id(), error = %e, "SIGTERM not delivered");
        }

        match tokio::time::timeout(self.grace, handle.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    job_id = %handle.id(),
                    grace_ms = self.grace.as_millis() as u64,
                    "Process did not exit after SIGTERM, forcing kill"
                );
                if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                    tracing::debug!(job_id = %handle.id(), error = %e, "SIGKILL not delivered");
                }
                handle.wait().await
            }
        }
    }
}

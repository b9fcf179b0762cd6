use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{AgentError, Result};
use crate::worker::supervisor::ExitOutcome;

/// Hard limit for one-shot runs such as thumbnail generation.
pub const ONESHOT_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of a command run to completion
#[derive(Debug)]
pub struct RunOutput {
    pub outcome: ExitOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// Stdout and stderr joined the way the test endpoint reports them.
    pub fn logs(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Runs short-lived commands synchronously with captured output.
///
/// Unlike supervised jobs these are awaited by the caller, so a run that
/// exceeds the timeout is killed and reported as a failure.
#[derive(Debug, Clone)]
pub struct OneShotExecutor {
    timeout: Duration,
}

impl Default for OneShotExecutor {
    fn default() -> Self {
        Self::new(ONESHOT_TIMEOUT)
    }
}

impl OneShotExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `argv` and collect its output, optionally inside `cwd`.
    pub async fn execute(&self, argv: &[String], cwd: Option<&Path>) -> Result<RunOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| AgentError::Launch {
            program: String::new(),
            message: "empty command".to_string(),
        })?;

        tracing::info!(program = %program, args = ?args, "Executing one-shot command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let result = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(program = %program, timeout_secs = self.timeout.as_secs(), "One-shot command timed out");
                return Err(AgentError::Timeout(self.timeout.as_secs()));
            }
        };

        Self::process_output(program, result)
    }

    fn process_output(
        program: &str,
        result: std::result::Result<std::process::Output, std::io::Error>,
    ) -> Result<RunOutput> {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let outcome = ExitOutcome::from(output.status);

                tracing::info!(program = %program, outcome = %outcome, "One-shot command finished");

                Ok(RunOutput {
                    outcome,
                    stdout,
                    stderr,
                })
            }
            Err(e) => {
                tracing::error!(program = %program, error = %e, "One-shot command failed to start");
                Err(AgentError::Launch {
                    program: program.to_string(),
                    message: if e.kind() == std::io::ErrorKind::NotFound {
                        format!("{} not found. Is it installed and in PATH?", program)
                    } else {
                        e.to_string()
                    },
                })
            }
        }
    }
}

//! Process execution for the agent.
//!
//! - **Supervision**: long-running jobs launched in their own process group,
//!   reaped in the background and stopped with SIGTERM escalating to SIGKILL
//! - **One-shot runs**: short commands awaited by the caller with captured
//!   output and a hard timeout
//!
//! # Components
//!
//! - [`ProcessSupervisor`]: launch / terminate / wait for supervised processes
//! - [`OneShotExecutor`]: run-to-completion with timeout (thumbnails, test run)

pub mod executor;
pub mod supervisor;

pub use executor::{OneShotExecutor, RunOutput};
pub use supervisor::{ExitOutcome, JobId, ProcessHandle, ProcessSupervisor};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::callback::CallbackNotifier;
use crate::jobs::record::{JobRecord, JobStatus};
use crate::jobs::registry::JobRegistry;
use crate::staging::MediaStager;

/// Time a freshly launched process gets before it is considered live.
pub const WARMUP_DELAY: Duration = Duration::from_secs(5);

/// Watches jobs from launch to cleanup, one task per job.
///
/// Per job the controller sees either a single `ERROR` (the process died during
/// warm-up) or `LIVE` followed by exactly one `IDLE`/`ERROR`, chosen by the exit
/// status. Cleanup only runs when the monitor wins the registry removal; if an
/// explicit stop got there first, the stop path has already cleaned up.
#[derive(Debug, Clone)]
pub struct JobMonitor {
    registry: Arc<JobRegistry>,
    stager: MediaStager,
    notifier: CallbackNotifier,
    warmup: Duration,
}

impl JobMonitor {
    pub fn new(
        registry: Arc<JobRegistry>,
        stager: MediaStager,
        notifier: CallbackNotifier,
        warmup: Duration,
    ) -> Self {
        Self {
            registry,
            stager,
            notifier,
            warmup,
        }
    }

    /// Start watching `job` in the background.
    pub fn spawn(&self, job: &JobRecord) -> JoinHandle<()> {
        let monitor = self.clone();
        let job = job.clone();
        tokio::spawn(async move { monitor.watch(job).await })
    }

    async fn watch(self, job: JobRecord) {
        let job_id = job.id();
        let stream_id = job.stream_id;
        let program = job.process.program().to_string();

        tokio::time::sleep(self.warmup).await;

        if let Some(outcome) = job.process.try_exit() {
            tracing::error!(job_id = %job_id, stream_id, outcome = %outcome, "Process exited during warm-up");
            if self.finish(&job).await {
                self.notify(
                    &job,
                    JobStatus::Error,
                    format!(
                        "{} failed to start with {}. Check agent logs for details.",
                        program, outcome
                    ),
                )
                .await;
            }
            return;
        }

        self.notify(&job, JobStatus::Live, "Stream is now live.").await;

        let outcome = job.process.wait().await;

        if !self.finish(&job).await {
            tracing::info!(job_id = %job_id, stream_id, outcome = %outcome, "Job was stopped on request");
            let status = if outcome.success() {
                JobStatus::Idle
            } else {
                JobStatus::Error
            };
            self.notify(
                &job,
                status,
                format!("Stream stopped on request ({}).", outcome),
            )
            .await;
            return;
        }

        if outcome.success() {
            tracing::info!(job_id = %job_id, stream_id, "Job finished successfully");
            self.notify(&job, JobStatus::Idle, "Stream finished successfully.")
                .await;
        } else {
            tracing::error!(job_id = %job_id, stream_id, outcome = %outcome, "Job exited with error");
            self.notify(
                &job,
                JobStatus::Error,
                format!(
                    "{} exited with {}. Check agent logs for details.",
                    program, outcome
                ),
            )
            .await;
        }
    }

    /// Claim the job out of the registry and tear down its staging directory.
    /// Returns false if another path already removed it.
    async fn finish(&self, job: &JobRecord) -> bool {
        match self.registry.claim(job).await {
            Some(record) => {
                self.stager.unstage(&record.staging_dir).await;
                true
            }
            None => {
                tracing::debug!(job_id = %job.id(), "Job already removed from registry");
                false
            }
        }
    }

    async fn notify(&self, job: &JobRecord, status: JobStatus, details: impl Into<String>) {
        self.notifier
            .notify(&job.callback, job.stream_id, status, details)
            .await;
    }
}

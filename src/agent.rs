use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api;
use crate::callback::{CallbackNotifier, CALLBACK_KEY_HEADER};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::jobs::{CallbackTarget, JobMonitor, JobRecord, JobRegistry, StreamId};
use crate::staging::{MediaStager, StagedCommand};
use crate::worker::{JobId, OneShotExecutor, ProcessSupervisor, RunOutput};

/// Header naming the stream a thumbnail upload belongs to.
pub const STREAM_ID_HEADER: &str = "X-Stream-Id";

/// Snapshot of what the agent is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub running_streams: Vec<StreamId>,
    pub process_count: usize,
}

/// The agent: ties staging, supervision, the registry and monitors together.
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    registry: Arc<JobRegistry>,
    supervisor: ProcessSupervisor,
    stager: MediaStager,
    monitor: JobMonitor,
    oneshot: OneShotExecutor,
    test_runner: OneShotExecutor,
    http: reqwest::Client,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let stager = MediaStager::http(config.staging_dir.clone());
        Self::with_stager(config, stager)
    }

    /// Build an agent around a custom stager, e.g. one with a different fetcher.
    pub fn with_stager(config: AgentConfig, stager: MediaStager) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let notifier = CallbackNotifier::new(config.callback_retry);
        let monitor = JobMonitor::new(registry.clone(), stager.clone(), notifier, config.warmup);

        Self {
            supervisor: ProcessSupervisor::new(config.terminate_grace),
            oneshot: OneShotExecutor::new(config.oneshot_timeout),
            test_runner: OneShotExecutor::new(config.test_run_timeout),
            http: reqwest::Client::new(),
            registry,
            stager,
            monitor,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Stage and launch a job, then hand it to a monitor.
    ///
    /// Returns once the process is spawned and registered. Other jobs of the
    /// same stream keep running.
    pub async fn start_job(
        &self,
        stream_id: StreamId,
        argv: &[String],
        callback: CallbackTarget,
    ) -> Result<JobId> {
        let job_key = format!("{}-{}", stream_id, Uuid::new_v4());
        let staged = self.stager.stage(&job_key, argv).await?;

        let process = match self.supervisor.launch(&staged.argv) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(stream_id, error = %e, "Failed to launch job");
                self.stager.unstage(&staged.dir).await;
                return Err(e);
            }
        };

        let record = JobRecord::new(stream_id, process, staged.dir, callback);
        let job_id = record.id();
        if let Some(stale) = self.registry.insert(record.clone()).await {
            self.stager.unstage(&stale.staging_dir).await;
        }
        self.monitor.spawn(&record);

        tracing::info!(job_id = %job_id, stream_id, "Job started");
        Ok(job_id)
    }

    /// Stop every job of a stream. Returns how many were stopped; zero means
    /// nothing was running.
    pub async fn stop_job(&self, stream_id: StreamId) -> usize {
        let stopped = self
            .registry
            .stop_all(stream_id, &self.supervisor, &self.stager)
            .await;
        if stopped == 0 {
            tracing::warn!(stream_id, "No running jobs to stop");
        } else {
            tracing::info!(stream_id, stopped, "Stream stopped");
        }
        stopped
    }

    /// Stage and run a thumbnail command to completion, then upload its output.
    ///
    /// The output file is the last argument, relative to the staging directory
    /// unless absolute. Staging is always torn down afterwards.
    pub async fn generate_thumbnail(
        &self,
        stream_id: StreamId,
        argv: &[String],
        upload: CallbackTarget,
    ) -> Result<()> {
        let job_key = format!("thumb-{}-{}", stream_id, Uuid::new_v4());
        let staged = self.stager.stage(&job_key, argv).await?;

        let result = self.run_thumbnail(stream_id, &staged, &upload).await;
        self.stager.unstage(&staged.dir).await;

        match &result {
            Ok(()) => tracing::info!(stream_id, "Thumbnail uploaded"),
            Err(e) => tracing::error!(stream_id, error = %e, "Thumbnail generation failed"),
        }
        result
    }

    async fn run_thumbnail(
        &self,
        stream_id: StreamId,
        staged: &StagedCommand,
        upload: &CallbackTarget,
    ) -> Result<()> {
        let output_arg = match staged.argv.as_slice() {
            [_, .., last] => last,
            _ => {
                return Err(AgentError::Launch {
                    program: staged.argv.first().cloned().unwrap_or_default(),
                    message: "thumbnail command has no output path".to_string(),
                })
            }
        };
        let output_path = staged.dir.join(output_arg);

        let run = self.oneshot.execute(&staged.argv, Some(&staged.dir)).await?;
        if !run.outcome.success() {
            tracing::error!(stream_id, logs = %run.stderr, "Thumbnail command failed");
            return Err(AgentError::Runtime {
                outcome: run.outcome,
            });
        }

        let bytes = tokio::fs::read(&output_path).await?;
        let upload_err = |message: String| AgentError::Upload {
            url: upload.url.clone(),
            message,
        };

        self.http
            .post(&upload.url)
            .header(CALLBACK_KEY_HEADER, &upload.key)
            .header(STREAM_ID_HEADER, stream_id.to_string())
            .header(reqwest::header::CONTENT_TYPE, content_type_for(&output_path))
            .body(bytes)
            .send()
            .await
            .map_err(|e| upload_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| upload_err(e.to_string()))?;

        Ok(())
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            running_streams: self.registry.stream_ids().await,
            process_count: self.registry.len().await,
        }
    }

    /// Encode a synthetic test pattern to check that the media binary works.
    pub async fn test_run(&self) -> Result<RunOutput> {
        let argv: Vec<String> = [
            self.config.binary.as_str(),
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=5:size=1280x720:rate=30",
            "-f",
            "null",
            "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        self.test_runner.execute(&argv, None).await
    }

    /// Stop every running job.
    pub async fn shutdown(&self) -> usize {
        let stopped = self
            .registry
            .stop_everything(&self.supervisor, &self.stager)
            .await;
        tracing::info!(stopped, "Stopped all jobs");
        stopped
    }

    /// Serve the HTTP API until `shutdown` fires, then stop every job.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.listen_addr;
        let app = api::router(self.clone());

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind agent API");
            AgentError::Io(e)
        })?;
        tracing::info!(addr = %addr, "Agent API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        self.shutdown().await;
        Ok(())
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("/tmp/t.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("t.png")), "image/png");
        assert_eq!(content_type_for(Path::new("thumb")), "application/octet-stream");
    }
}

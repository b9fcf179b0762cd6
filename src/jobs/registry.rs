use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::jobs::record::{JobRecord, StreamId};
use crate::staging::MediaStager;
use crate::worker::{JobId, ProcessSupervisor};

/// Registry of running jobs, keyed by job id.
///
/// All access goes through one lock, held only for map operations and never
/// across process or filesystem work. Removal is the ownership hand-off:
/// whoever gets the record back from [`JobRegistry::remove`] is the only one
/// allowed to tear the job down.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Returns the record it displaced, which can only be a
    /// reaped process whose pid the OS has already handed out again.
    pub async fn insert(&self, record: JobRecord) -> Option<JobRecord> {
        let id = record.id();
        let stream_id = record.stream_id;
        let displaced = self.jobs.write().await.insert(id, record);
        if let Some(stale) = &displaced {
            tracing::warn!(
                job_id = %id,
                stream_id,
                stale_stream_id = stale.stream_id,
                "Pid reused while its previous job was still registered"
            );
        }
        displaced
    }

    /// Remove a job, returning its record if this call was the one that removed it.
    pub async fn remove(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.write().await.remove(&id)
    }

    /// Remove `record` only if the entry under its id is still the same launch.
    pub async fn claim(&self, record: &JobRecord) -> Option<JobRecord> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&record.id()) {
            Some(current) if current.process.is_same_launch(&record.process) => {
                jobs.remove(&record.id())
            }
            _ => None,
        }
    }

    pub async fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: JobId) -> bool {
        self.jobs.read().await.contains_key(&id)
    }

    /// Ids of every job running for `stream_id`, oldest first.
    pub async fn find_by_stream(&self, stream_id: StreamId) -> Vec<JobId> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&JobRecord> = jobs
            .values()
            .filter(|r| r.stream_id == stream_id)
            .collect();
        matching.sort_by_key(|r| r.created_at);
        matching.into_iter().map(JobRecord::id).collect()
    }

    /// Distinct stream ids with at least one running job.
    pub async fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .jobs
            .read()
            .await
            .values()
            .map(|r| r.stream_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Stop every job of `stream_id` and clean up after it.
    ///
    /// The matching records are claimed in one step, so a concurrent monitor or
    /// a second stop never terminates or unstages the same job again. Returns
    /// once every claimed process has exited and its staging directory is gone.
    /// Teardown runs on detached tasks and finishes even if the caller stops
    /// waiting.
    pub async fn stop_all(
        &self,
        stream_id: StreamId,
        supervisor: &ProcessSupervisor,
        stager: &MediaStager,
    ) -> usize {
        let claimed = self.take_matching(|r| r.stream_id == stream_id).await;
        Self::shut_down(claimed, supervisor, stager).await
    }

    /// Stop every registered job. Used on agent shutdown.
    pub async fn stop_everything(&self, supervisor: &ProcessSupervisor, stager: &MediaStager) -> usize {
        let claimed = self.take_matching(|_| true).await;
        Self::shut_down(claimed, supervisor, stager).await
    }

    async fn take_matching(&self, predicate: impl Fn(&JobRecord) -> bool) -> Vec<JobRecord> {
        let mut jobs = self.jobs.write().await;
        let ids: Vec<JobId> = jobs
            .values()
            .filter(|r| predicate(r))
            .map(JobRecord::id)
            .collect();
        ids.into_iter().filter_map(|id| jobs.remove(&id)).collect()
    }

    async fn shut_down(
        records: Vec<JobRecord>,
        supervisor: &ProcessSupervisor,
        stager: &MediaStager,
    ) -> usize {
        let tasks: Vec<JoinHandle<()>> = records
            .into_iter()
            .map(|record| {
                let supervisor = supervisor.clone();
                let stager = stager.clone();
                tokio::spawn(async move {
                    let outcome = supervisor.terminate(&record.process).await;
                    stager.unstage(&record.staging_dir).await;
                    tracing::info!(
                        job_id = %record.id(),
                        stream_id = record.stream_id,
                        outcome = %outcome,
                        "Job stopped"
                    );
                })
            })
            .collect();

        let mut stopped = 0;
        for task in tasks {
            match task.await {
                Ok(()) => stopped += 1,
                Err(e) => tracing::error!(error = %e, "Stop task failed"),
            }
        }
        stopped
    }
}

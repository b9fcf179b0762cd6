use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::{JobId, ProcessHandle};

/// Caller-chosen identifier of a stream. Several jobs may share one.
pub type StreamId = i64;

/// Status reported to the controller. Never stored by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Live,
    Idle,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Live => write!(f, "LIVE"),
            JobStatus::Idle => write!(f, "IDLE"),
            JobStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Where status transitions of a job are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub url: String,
    pub key: String,
}

/// A running job as tracked by the registry. Immutable once inserted.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub stream_id: StreamId,
    pub process: ProcessHandle,
    pub staging_dir: PathBuf,
    pub callback: CallbackTarget,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        stream_id: StreamId,
        process: ProcessHandle,
        staging_dir: PathBuf,
        callback: CallbackTarget,
    ) -> Self {
        Self {
            stream_id,
            process,
            staging_dir,
            callback,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> JobId {
        self.process.id()
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Job, JobId, JobResult, JobStatus};

/// Fields written through to the durable store. A `None` field is left
/// untouched; every applied update also refreshes `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct DurableUpdate {
    pub status: Option<JobStatus>,
    pub error: Option<String>,
    pub result: Option<JobResult>,
    pub tags: Option<Vec<String>>,
    pub keep_audio: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DurableUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_result(mut self, result: JobResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Durable job persistence. The single source of truth across process
/// restarts; only single-record atomicity is assumed.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    async fn update_job(&self, id: JobId, update: DurableUpdate) -> Result<(), JobStoreError>;

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError>;

    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<u64, JobStoreError>;

    /// Oldest non-deleted pending job, if any.
    async fn next_pending(&self) -> Result<Option<Job>, JobStoreError>;

    /// User-initiated soft delete; the record itself is retained.
    async fn soft_delete_job(&self, id: JobId) -> Result<(), JobStoreError>;
}

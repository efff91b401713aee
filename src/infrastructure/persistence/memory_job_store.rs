use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::application::ports::{DurableUpdate, JobStore, JobStoreError};
use crate::domain::{Job, JobId, JobStatus};

/// HashMap-backed store for tests and for running without a database. The
/// same single-record atomicity the Postgres adapter provides.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id).cloned())
    }

    async fn update_job(&self, id: JobId, update: DurableUpdate) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(result) = update.result {
            job.result = result;
        }
        if let Some(tags) = update.tags {
            job.tags = tags;
        }
        if let Some(keep_audio) = update.keep_audio {
            job.keep_audio = keep_audio;
        }
        if let Some(started_at) = update.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = Some(completed_at);
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        matched.sort_by_key(|job| job.created_at);
        Ok(matched)
    }

    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<u64, JobStoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|job| job.status == status).count() as u64)
    }

    async fn next_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && !job.deleted)
            .min_by_key(|job| job.created_at)
            .cloned())
    }

    async fn soft_delete_job(&self, id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;
        job.deleted = true;
        job.updated_at = Utc::now();
        Ok(())
    }
}

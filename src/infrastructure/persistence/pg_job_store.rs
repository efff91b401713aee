use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::instrument;

use crate::application::ports::{DurableUpdate, JobStore, JobStoreError};
use crate::domain::{FileMeta, Job, JobConfig, JobId, JobResult, JobStatus, OwnerId};

const JOB_COLUMNS: &str = "id, owner_id, status, config, file_name, file_size, transcript_ref, \
     segments_ref, audio_ref, tags, keep_audio, deleted, error_message, created_at, updated_at, \
     started_at, completed_at";

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| JobStoreError::ConnectionFailed(e.to_string()))?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| JobStoreError::ConnectionFailed(format!("migrations: {}", e)))?;

        Ok(Self::new(pool))
    }
}

fn row_to_job(row: &PgRow) -> Result<Job, JobStoreError> {
    let query_err = |e: sqlx::Error| JobStoreError::QueryFailed(e.to_string());

    let status: String = row.try_get("status").map_err(query_err)?;
    let status = status.parse::<JobStatus>().map_err(JobStoreError::QueryFailed)?;
    let config: Json<JobConfig> = row.try_get("config").map_err(query_err)?;
    let file_size: i64 = row.try_get("file_size").map_err(query_err)?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(query_err)?),
        owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(query_err)?),
        status,
        config: config.0,
        file: FileMeta {
            name: row.try_get("file_name").map_err(query_err)?,
            size: file_size as u64,
        },
        result: JobResult {
            transcript_ref: row.try_get("transcript_ref").map_err(query_err)?,
            segments_ref: row.try_get("segments_ref").map_err(query_err)?,
            audio_ref: row.try_get("audio_ref").map_err(query_err)?,
        },
        tags: row.try_get("tags").map_err(query_err)?,
        keep_audio: row.try_get("keep_audio").map_err(query_err)?,
        deleted: row.try_get("deleted").map_err(query_err)?,
        error: row.try_get("error_message").map_err(query_err)?,
        created_at: row.try_get("created_at").map_err(query_err)?,
        updated_at: row.try_get("updated_at").map_err(query_err)?,
        started_at: row.try_get("started_at").map_err(query_err)?,
        completed_at: row.try_get("completed_at").map_err(query_err)?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create_job(&self, job: &Job) -> Result<(), JobStoreError> {
        sqlx::query(
            "INSERT INTO jobs (id, owner_id, status, config, file_name, file_size, transcript_ref, \
             segments_ref, audio_ref, tags, keep_audio, deleted, error_message, created_at, \
             updated_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(job.id.as_uuid())
        .bind(job.owner_id.as_uuid())
        .bind(job.status.as_str())
        .bind(Json(&job.config))
        .bind(&job.file.name)
        .bind(job.file.size as i64)
        .bind(&job.result.transcript_ref)
        .bind(&job.result.segments_ref)
        .bind(&job.result.audio_ref)
        .bind(&job.tags)
        .bind(job.keep_audio)
        .bind(job.deleted)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self, update), fields(job_id = %id))]
    async fn update_job(&self, id: JobId, update: DurableUpdate) -> Result<(), JobStoreError> {
        let (transcript_ref, segments_ref, audio_ref) = match &update.result {
            Some(result) => (
                result.transcript_ref.clone(),
                result.segments_ref.clone(),
                result.audio_ref.clone(),
            ),
            None => (None, None, None),
        };

        let done = sqlx::query(
            "UPDATE jobs SET \
             status = COALESCE($2, status), \
             error_message = COALESCE($3, error_message), \
             transcript_ref = COALESCE($4, transcript_ref), \
             segments_ref = COALESCE($5, segments_ref), \
             audio_ref = COALESCE($6, audio_ref), \
             tags = COALESCE($7, tags), \
             keep_audio = COALESCE($8, keep_audio), \
             started_at = COALESCE($9, started_at), \
             completed_at = COALESCE($10, completed_at), \
             updated_at = $11 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.error)
        .bind(transcript_ref)
        .bind(segments_ref)
        .bind(audio_ref)
        .bind(update.tags)
        .bind(update.keep_audio)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        if done.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(status = %status))]
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE status = $1 ORDER BY created_at",
            JOB_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self), fields(status = %status))]
    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<u64, JobStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        let count: i64 = row
            .try_get("n")
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(count as u64)
    }

    #[instrument(skip(self))]
    async fn next_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE status = $1 AND NOT deleted \
             ORDER BY created_at LIMIT 1",
            JOB_COLUMNS
        ))
        .bind(JobStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn soft_delete_job(&self, id: JobId) -> Result<(), JobStoreError> {
        let done = sqlx::query("UPDATE jobs SET deleted = TRUE, updated_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        if done.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

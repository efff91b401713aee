use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DurableUpdate, JobStore, JobStoreError};
use crate::application::services::worker_registry::{
    WorkerRegistry, kill_worker, terminate_worker,
};
use crate::domain::{
    ChunkState, ChunkStatus, FileMeta, Job, JobConfig, JobId, JobStatus, OwnerId,
    ProgressSnapshot, Segment, percentage,
};

/// Error message applied to jobs recovered by the startup orphan sweep.
pub const ORPHAN_ERROR: &str = "interrupted by restart";

/// In-process execution state for one job. Lost on restart, which is why the
/// durable status must independently reflect reality.
#[derive(Debug, Clone, Default)]
pub struct VolatileJobState {
    pub progress_text: String,
    pub chunks: Vec<ChunkState>,
    pub audio_converted: bool,
    pub punctuation_started: bool,
    pub punctuation_completed: bool,
    pub punctuation_progress: Option<(u32, u32)>,
    pub diarization_started: bool,
    pub diarization_completed: bool,
    pub cancel_requested: bool,
    /// High-water mark so the reported percentage never regresses.
    high_water_pct: f64,
}

/// In-memory-only fields. Applying one of these never touches the store.
#[derive(Debug, Clone, Default)]
pub struct VolatileUpdate {
    pub progress_text: Option<String>,
    pub init_chunks: Option<Vec<ChunkState>>,
    pub chunk_status: Option<(u32, ChunkStatus)>,
    pub chunk_output: Option<(u32, String, Vec<Segment>)>,
    pub audio_converted: Option<bool>,
    pub punctuation_started: Option<bool>,
    pub punctuation_completed: Option<bool>,
    pub punctuation_progress: Option<(u32, u32)>,
    pub diarization_started: Option<bool>,
    pub diarization_completed: Option<bool>,
}

impl VolatileUpdate {
    pub fn progress_text(text: impl Into<String>) -> Self {
        Self {
            progress_text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn init_chunks(chunks: Vec<ChunkState>) -> Self {
        Self {
            init_chunks: Some(chunks),
            ..Self::default()
        }
    }

    pub fn chunk_status(index: u32, status: ChunkStatus) -> Self {
        Self {
            chunk_status: Some((index, status)),
            ..Self::default()
        }
    }

    pub fn chunk_output(index: u32, text: String, segments: Vec<Segment>) -> Self {
        Self {
            chunk_output: Some((index, text, segments)),
            ..Self::default()
        }
    }

    pub fn audio_converted() -> Self {
        Self {
            audio_converted: Some(true),
            ..Self::default()
        }
    }

    pub fn with_progress_text(mut self, text: impl Into<String>) -> Self {
        self.progress_text = Some(text.into());
        self
    }
}

/// The update type routed by [`JobCoordinator::update`]: the variant is
/// decided at the call site, not by field-name lookup.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Durable(DurableUpdate),
    Volatile(VolatileUpdate),
}

/// Durable snapshot merged with whatever volatile detail this process has.
#[derive(Debug, Clone)]
pub struct JobView {
    pub job: Job,
    pub progress_text: String,
    pub progress_percentage: f64,
    pub chunks: Vec<ChunkState>,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("invalid job config: {0}")]
    Validation(String),
    #[error("job store: {0}")]
    Store(JobStoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<JobStoreError> for CoordinatorError {
    fn from(err: JobStoreError) -> Self {
        CoordinatorError::Store(err)
    }
}

/// Owns the job lifecycle: the durable record, the process-private volatile
/// state, per-job cancellation tokens, temp directories, and worker handles.
/// All shared maps live behind the coordinator's own locks; no caller ever
/// touches them directly.
pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    work_root: PathBuf,
    volatile: Mutex<HashMap<JobId, VolatileJobState>>,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    job_dirs: Mutex<HashMap<JobId, PathBuf>>,
    sources: Mutex<HashMap<JobId, PathBuf>>,
    workers: Arc<WorkerRegistry>,
}

impl JobCoordinator {
    pub fn new(store: Arc<dyn JobStore>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_root: work_root.into(),
            volatile: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            job_dirs: Mutex::new(HashMap::new()),
            sources: Mutex::new(HashMap::new()),
            workers: Arc::new(WorkerRegistry::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn worker_registry(&self) -> Arc<WorkerRegistry> {
        Arc::clone(&self.workers)
    }

    /// Create the durable record, stage the uploaded audio into the job's
    /// temp directory, and initialize empty volatile state.
    pub async fn create(
        &self,
        owner: OwnerId,
        config: JobConfig,
        file: FileMeta,
        source: &Path,
        keep_audio: bool,
        tags: Vec<String>,
    ) -> Result<Job, CoordinatorError> {
        config.validate().map_err(CoordinatorError::Validation)?;

        let mut job = Job::new(owner, config, file);
        job.keep_audio = keep_audio;
        job.tags = tags;

        let job_dir = self.work_root.join(job.id.to_string());
        tokio::fs::create_dir_all(&job_dir).await?;
        let staged = job_dir.join(staged_name(&job.file.name));
        tokio::fs::copy(source, &staged).await?;

        self.store.create_job(&job).await?;

        {
            let mut volatile = self.volatile.lock().expect("volatile map poisoned");
            volatile.insert(job.id, VolatileJobState::default());
        }
        self.job_dirs
            .lock()
            .expect("job dir map poisoned")
            .insert(job.id, job_dir);
        self.sources
            .lock()
            .expect("source map poisoned")
            .insert(job.id, staged);

        tracing::info!(job_id = %job.id, file = %job.file.name, "Job created");
        Ok(job)
    }

    /// Merged view for status polling. Unknown ids and owner mismatches both
    /// come back as NotFound; authorization is enforced here, not upstream.
    pub async fn get(&self, job_id: JobId, owner: OwnerId) -> Result<JobView, CoordinatorError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .filter(|job| job.owner_id == owner && !job.deleted)
            .ok_or(CoordinatorError::NotFound(job_id))?;

        Ok(self.merge_view(job))
    }

    /// Durable record without authorization, for the executing pipeline.
    pub async fn load_job(&self, job_id: JobId) -> Result<Job, CoordinatorError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(CoordinatorError::NotFound(job_id))
    }

    fn merge_view(&self, job: Job) -> JobView {
        let mut volatile = self.volatile.lock().expect("volatile map poisoned");
        match volatile.get_mut(&job.id) {
            Some(state) => {
                let snapshot = ProgressSnapshot {
                    status: Some(job.status),
                    audio_converted: state.audio_converted,
                    chunks: &state.chunks,
                    punctuation_started: state.punctuation_started,
                    punctuation_completed: state.punctuation_completed,
                    punctuation_progress: state.punctuation_progress,
                };
                let pct = percentage(&snapshot).max(state.high_water_pct);
                state.high_water_pct = pct;
                JobView {
                    progress_text: state.progress_text.clone(),
                    progress_percentage: pct,
                    chunks: state.chunks.clone(),
                    job,
                }
            }
            None => {
                let pct = if job.status == JobStatus::Completed {
                    100.0
                } else {
                    0.0
                };
                JobView {
                    progress_text: String::new(),
                    progress_percentage: pct,
                    chunks: Vec::new(),
                    job,
                }
            }
        }
    }

    /// Route an update to the store or to in-memory state. Durable writes
    /// always refresh `updated_at`; volatile writes never touch the store.
    pub async fn update(&self, job_id: JobId, update: JobUpdate) -> Result<(), CoordinatorError> {
        match update {
            JobUpdate::Durable(durable) => {
                self.store
                    .update_job(job_id, durable)
                    .await
                    .map_err(|err| match err {
                        JobStoreError::NotFound(_) => CoordinatorError::NotFound(job_id),
                        other => CoordinatorError::Store(other),
                    })
            }
            JobUpdate::Volatile(volatile) => {
                let mut map = self.volatile.lock().expect("volatile map poisoned");
                let state = map
                    .get_mut(&job_id)
                    .ok_or(CoordinatorError::NotFound(job_id))?;
                apply_volatile(state, volatile);
                Ok(())
            }
        }
    }

    /// Mark the job as executing: volatile state and token exist afterwards,
    /// the durable status is Processing (unless a cancellation already moved
    /// it to Canceling) and `started_at` is set.
    pub async fn begin_execution(
        &self,
        job_id: JobId,
    ) -> Result<(CancellationToken, PathBuf), CoordinatorError> {
        let job = self.load_job(job_id).await?;

        {
            let mut volatile = self.volatile.lock().expect("volatile map poisoned");
            volatile.entry(job_id).or_default();
        }
        let token = self.cancellation_token(job_id);

        let job_dir = {
            let mut dirs = self.job_dirs.lock().expect("job dir map poisoned");
            dirs.entry(job_id)
                .or_insert_with(|| self.work_root.join(job_id.to_string()))
                .clone()
        };
        tokio::fs::create_dir_all(&job_dir).await?;

        if job.status == JobStatus::Pending {
            self.store
                .update_job(
                    job_id,
                    DurableUpdate::status(JobStatus::Processing).with_started_at(Utc::now()),
                )
                .await?;
        }

        Ok((token, job_dir))
    }

    /// Pick the oldest pending job and admit it for execution.
    pub async fn admit_next(&self) -> Result<Option<JobId>, CoordinatorError> {
        match self.store.next_pending().await? {
            Some(job) => {
                self.begin_execution(job.id).await?;
                Ok(Some(job.id))
            }
            None => Ok(None),
        }
    }

    /// Per-job token, created on first use. Cloned into the pipeline and the
    /// chunk coordinator; checked only at defined suspension points.
    pub fn cancellation_token(&self, job_id: JobId) -> CancellationToken {
        let mut tokens = self.tokens.lock().expect("token map poisoned");
        tokens.entry(job_id).or_default().clone()
    }

    /// Idempotent. Flags the volatile state, fires the token, and writes the
    /// transient Canceling status so an immediate re-read by the client does
    /// not race the real cancellation flow.
    pub async fn request_cancellation(&self, job_id: JobId) {
        {
            let mut volatile = self.volatile.lock().expect("volatile map poisoned");
            if let Some(state) = volatile.get_mut(&job_id) {
                state.cancel_requested = true;
            }
        }
        self.cancellation_token(job_id).cancel();

        match self.store.get_job(job_id).await {
            // Still queued: no executor will ever surface the flag, so the
            // cancellation completes right here.
            Ok(Some(job)) if job.status == JobStatus::Pending => {
                if let Err(err) = self
                    .store
                    .update_job(
                        job_id,
                        DurableUpdate::status(JobStatus::Cancelled)
                            .with_completed_at(Utc::now()),
                    )
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %err, "Failed to cancel queued job");
                }
                self.release_resources(job_id).await;
            }
            Ok(Some(job)) if job.status == JobStatus::Processing => {
                if let Err(err) = self
                    .store
                    .update_job(job_id, DurableUpdate::status(JobStatus::Canceling))
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %err, "Failed to mark job canceling");
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Cancellation status read failed")
            }
        }
        tracing::info!(job_id = %job_id, "Cancellation requested");
    }

    pub fn is_cancelled(&self, job_id: JobId) -> bool {
        let volatile = self.volatile.lock().expect("volatile map poisoned");
        if let Some(state) = volatile.get(&job_id) {
            if state.cancel_requested {
                return true;
            }
        }
        drop(volatile);
        let tokens = self.tokens.lock().expect("token map poisoned");
        tokens.get(&job_id).is_some_and(|t| t.is_cancelled())
    }

    /// Synchronous entry point for the punctuation progress callback, which
    /// fires from inside the restorer and cannot await.
    pub fn note_punctuation_progress(&self, job_id: JobId, current: u32, total: u32) {
        let mut volatile = self.volatile.lock().expect("volatile map poisoned");
        if let Some(state) = volatile.get_mut(&job_id) {
            state.punctuation_progress = Some((current, total));
        }
    }

    pub fn register_worker(&self, job_id: JobId, pid: u32) {
        self.workers.register(job_id, pid);
    }

    pub fn deregister_worker(&self, job_id: JobId, pid: u32) {
        self.workers.deregister(job_id, pid);
    }

    /// Staged source audio for the job, if this process created it.
    pub fn source_path(&self, job_id: JobId) -> Option<PathBuf> {
        self.sources
            .lock()
            .expect("source map poisoned")
            .get(&job_id)
            .cloned()
    }

    /// Idempotent teardown: kill registered workers, drop the temp
    /// directory, clear volatile state and token. Safe on jobs that never
    /// started, on unknown ids, and when called concurrently with itself;
    /// runs from success, failure, and cancellation paths alike.
    pub async fn release_resources(&self, job_id: JobId) {
        for pid in self.workers.drain(job_id) {
            tracing::debug!(job_id = %job_id, pid, "Killing job worker");
            kill_worker(pid);
        }

        let job_dir = self
            .job_dirs
            .lock()
            .expect("job dir map poisoned")
            .remove(&job_id);
        if let Some(dir) = job_dir {
            if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(job_id = %job_id, error = %err, "Temp dir removal failed");
                }
            }
        }

        self.sources
            .lock()
            .expect("source map poisoned")
            .remove(&job_id);
        self.volatile
            .lock()
            .expect("volatile map poisoned")
            .remove(&job_id);
        self.tokens
            .lock()
            .expect("token map poisoned")
            .remove(&job_id);

        tracing::debug!(job_id = %job_id, "Resources released");
    }

    /// Startup recovery: jobs left pending or processing by a previous
    /// process have no volatile state here and can never make progress, so
    /// they are failed outright rather than left dangling.
    pub async fn sweep_orphans(&self) -> Result<u64, CoordinatorError> {
        let mut swept = 0u64;
        for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Canceling] {
            for job in self.store.list_jobs_by_status(status).await? {
                self.store
                    .update_job(
                        job.id,
                        DurableUpdate::status(JobStatus::Failed).with_error(ORPHAN_ERROR),
                    )
                    .await?;
                let stale_dir = self.work_root.join(job.id.to_string());
                if let Err(err) = tokio::fs::remove_dir_all(&stale_dir).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(job_id = %job.id, error = %err, "Stale dir removal failed");
                    }
                }
                tracing::warn!(job_id = %job.id, previous = %status, "Orphaned job failed");
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Periodic guard against worker leaks: terminate child processes whose
    /// job is no longer active in this process.
    pub async fn sweep_orphaned_workers(&self, grace: Duration) {
        let active: Vec<JobId> = {
            let volatile = self.volatile.lock().expect("volatile map poisoned");
            volatile.keys().copied().collect()
        };
        for (job_id, pid) in self.workers.entries() {
            if !active.contains(&job_id) {
                tracing::warn!(job_id = %job_id, pid, "Terminating orphaned worker");
                terminate_worker(pid, grace).await;
                self.workers.deregister(job_id, pid);
            }
        }
    }

    pub async fn count_processing(&self) -> Result<u64, CoordinatorError> {
        Ok(self
            .store
            .count_jobs_by_status(JobStatus::Processing)
            .await?)
    }

    pub async fn count_pending(&self) -> Result<u64, CoordinatorError> {
        Ok(self.store.count_jobs_by_status(JobStatus::Pending).await?)
    }

    pub async fn next_pending(&self) -> Result<Option<Job>, CoordinatorError> {
        Ok(self.store.next_pending().await?)
    }
}

fn apply_volatile(state: &mut VolatileJobState, update: VolatileUpdate) {
    if let Some(text) = update.progress_text {
        state.progress_text = text;
    }
    if let Some(chunks) = update.init_chunks {
        state.chunks = chunks;
    }
    if let Some((index, status)) = update.chunk_status {
        if let Some(chunk) = state.chunks.iter_mut().find(|c| c.index == index) {
            chunk.status = status;
        }
    }
    if let Some((index, text, segments)) = update.chunk_output {
        if let Some(chunk) = state.chunks.iter_mut().find(|c| c.index == index) {
            chunk.status = ChunkStatus::Completed;
            chunk.text = text;
            chunk.segments = segments;
        }
    }
    if let Some(converted) = update.audio_converted {
        state.audio_converted = converted;
    }
    if let Some(started) = update.punctuation_started {
        state.punctuation_started = started;
    }
    if let Some(completed) = update.punctuation_completed {
        state.punctuation_completed = completed;
    }
    if let Some(progress) = update.punctuation_progress {
        state.punctuation_progress = Some(progress);
    }
    if let Some(started) = update.diarization_started {
        state.diarization_started = started;
    }
    if let Some(completed) = update.diarization_completed {
        state.diarization_completed = completed;
    }
}

/// Staged filename keeps the original extension so ffmpeg's probing has a
/// hint to work with.
fn staged_name(original: &str) -> String {
    match Path::new(original).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("source.{}", ext),
        None => "source".to_string(),
    }
}

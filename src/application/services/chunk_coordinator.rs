use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AudioProcessor, Recognition, RecognizerError, SpeechRecognizer};
use crate::application::services::job_coordinator::{JobCoordinator, JobUpdate, VolatileUpdate};
use crate::application::services::worker_registry::kill_worker;
use crate::domain::{ChunkState, ChunkStatus, JobId, plan_chunks};

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Messages from chunk workers back to the coordinator loop. Workers never
/// write volatile state themselves; the loop is the single writer.
enum ChunkEvent {
    Started(u32),
    Completed(u32, Recognition),
    Failed(u32, RecognizerError),
}

/// Fans chunk recognition out to a bounded pool and merges results in index
/// order. Chunks complete in arbitrary order; the merge never depends on
/// completion time.
pub struct ChunkCoordinator {
    audio: Arc<dyn AudioProcessor>,
    recognizer: Arc<dyn SpeechRecognizer>,
    workers: usize,
}

impl ChunkCoordinator {
    pub fn new(
        audio: Arc<dyn AudioProcessor>,
        recognizer: Arc<dyn SpeechRecognizer>,
        workers: usize,
    ) -> Self {
        Self {
            audio,
            recognizer,
            workers: workers.max(1),
        }
    }

    /// Recognize `wav` chunk by chunk. Short files bypass the pool entirely:
    /// a single virtual chunk is recognized in place.
    pub async fn transcribe(
        &self,
        coordinator: &JobCoordinator,
        job_id: JobId,
        wav: &Path,
        duration_ms: u64,
        chunk_ms: u64,
        language: Option<&str>,
        job_dir: &Path,
        token: &CancellationToken,
    ) -> Result<Recognition, ChunkError> {
        if duration_ms <= chunk_ms {
            return self
                .recognizer
                .recognize(wav, language, job_id)
                .await
                .map_err(|err| ChunkError::Failed(err.to_string()));
        }

        let chunks = plan_chunks(duration_ms, chunk_ms);
        set_volatile(
            coordinator,
            job_id,
            VolatileUpdate::init_chunks(chunks.clone())
                .with_progress_text(format!("Transcribing (0/{})", chunks.len())),
        )
        .await;

        let chunk_dir = job_dir.join("chunks");
        tokio::fs::create_dir_all(&chunk_dir)
            .await
            .map_err(|err| ChunkError::Failed(format!("chunk dir: {}", err)))?;

        let paths = match self.cut_chunks(&chunks, wav, &chunk_dir, token).await {
            Ok(paths) => paths,
            Err(err) => {
                let _ = tokio::fs::remove_dir_all(&chunk_dir).await;
                return Err(err);
            }
        };

        let outcome = if self.workers > 1 {
            self.run_pool(coordinator, job_id, &chunks, &paths, language, token)
                .await
        } else {
            self.run_sequential(coordinator, job_id, &chunks, &paths, language, token)
                .await
        };

        // Chunk temp files are discarded on every exit path.
        if let Err(err) = tokio::fs::remove_dir_all(&chunk_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, error = %err, "Chunk dir removal failed");
            }
        }

        let results = outcome?;
        Ok(merge_chunks(&chunks, results))
    }

    /// Write each chunk's time range to its own temp WAV segment.
    async fn cut_chunks(
        &self,
        chunks: &[ChunkState],
        wav: &Path,
        chunk_dir: &Path,
        token: &CancellationToken,
    ) -> Result<Vec<PathBuf>, ChunkError> {
        let mut paths = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if token.is_cancelled() {
                return Err(ChunkError::Cancelled);
            }
            let path = chunk_dir.join(format!("chunk_{:03}.wav", chunk.index));
            self.audio
                .extract_segment(wav, &path, chunk.start_ms, chunk.duration_ms())
                .await
                .map_err(|err| {
                    ChunkError::Failed(format!("cutting chunk {}: {}", chunk.index, err))
                })?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Parallel fan-out: all chunks submitted up front, pool bounded by a
    /// semaphore, results consumed in completion order. First failure
    /// cancels everything in flight and force-kills the job's workers.
    async fn run_pool(
        &self,
        coordinator: &JobCoordinator,
        job_id: JobId,
        chunks: &[ChunkState],
        paths: &[PathBuf],
        language: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Option<Recognition>>, ChunkError> {
        let total = chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::channel::<ChunkEvent>(total.max(1));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for (chunk, path) in chunks.iter().zip(paths) {
            let index = chunk.index;
            let path = path.clone();
            let language = language.map(str::to_owned);
            let recognizer = Arc::clone(&self.recognizer);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if tx.send(ChunkEvent::Started(index)).await.is_err() {
                    return;
                }
                let result = recognizer
                    .recognize(&path, language.as_deref(), job_id)
                    .await;
                let event = match result {
                    Ok(recognition) => ChunkEvent::Completed(index, recognition),
                    Err(err) => ChunkEvent::Failed(index, err),
                };
                let _ = tx.send(event).await;
            });
        }
        drop(tx);

        let mut results: Vec<Option<Recognition>> = vec![None; total];
        let mut completed = 0usize;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.abort_inflight(coordinator, job_id, &mut tasks);
                    return Err(ChunkError::Cancelled);
                }
                event = rx.recv() => match event {
                    Some(ChunkEvent::Started(index)) => {
                        set_volatile(
                            coordinator,
                            job_id,
                            VolatileUpdate::chunk_status(index, ChunkStatus::Processing),
                        )
                        .await;
                    }
                    Some(ChunkEvent::Completed(index, recognition)) => {
                        results[index as usize - 1] = Some(recognition.clone());
                        completed += 1;
                        set_volatile(
                            coordinator,
                            job_id,
                            VolatileUpdate::chunk_output(
                                index,
                                recognition.text,
                                recognition.segments,
                            )
                            .with_progress_text(format!("Transcribing ({}/{})", completed, total)),
                        )
                        .await;
                        if completed == total {
                            break;
                        }
                    }
                    Some(ChunkEvent::Failed(index, err)) => {
                        set_volatile(
                            coordinator,
                            job_id,
                            VolatileUpdate::chunk_status(index, ChunkStatus::Failed),
                        )
                        .await;
                        self.abort_inflight(coordinator, job_id, &mut tasks);
                        return Err(ChunkError::Failed(format!(
                            "chunk {} of {} failed: {}",
                            index, total, err
                        )));
                    }
                    // Every sender gone without all chunks completing means a
                    // worker task died without reporting.
                    None => {
                        self.abort_inflight(coordinator, job_id, &mut tasks);
                        return Err(ChunkError::Failed(
                            "chunk worker exited without result".to_string(),
                        ));
                    }
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        Ok(results)
    }

    /// Non-parallel chunk loop: same planning and merge, no pool.
    async fn run_sequential(
        &self,
        coordinator: &JobCoordinator,
        job_id: JobId,
        chunks: &[ChunkState],
        paths: &[PathBuf],
        language: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Option<Recognition>>, ChunkError> {
        let total = chunks.len();
        let mut results: Vec<Option<Recognition>> = vec![None; total];

        for (chunk, path) in chunks.iter().zip(paths) {
            if token.is_cancelled() {
                return Err(ChunkError::Cancelled);
            }
            set_volatile(
                coordinator,
                job_id,
                VolatileUpdate::chunk_status(chunk.index, ChunkStatus::Processing),
            )
            .await;

            let recognition = self
                .recognizer
                .recognize(path, language, job_id)
                .await
                .map_err(|err| {
                    ChunkError::Failed(format!(
                        "chunk {} of {} failed: {}",
                        chunk.index, total, err
                    ))
                })?;

            results[chunk.index as usize - 1] = Some(recognition.clone());
            set_volatile(
                coordinator,
                job_id,
                VolatileUpdate::chunk_output(chunk.index, recognition.text, recognition.segments)
                    .with_progress_text(format!("Transcribing ({}/{})", chunk.index, total)),
            )
            .await;
        }

        Ok(results)
    }

    /// Abort pending futures and force-kill any worker process the job has
    /// registered; dispatched recognition is not internally interruptible.
    fn abort_inflight(&self, coordinator: &JobCoordinator, job_id: JobId, tasks: &mut JoinSet<()>) {
        tasks.abort_all();
        for pid in coordinator.worker_registry().drain(job_id) {
            tracing::debug!(job_id = %job_id, pid, "Force-killing chunk worker");
            kill_worker(pid);
        }
    }
}

/// Index-order merge: text joined by single spaces, each chunk's segment
/// times shifted by its offset on the source timeline, language taken from
/// the first chunk.
fn merge_chunks(chunks: &[ChunkState], results: Vec<Option<Recognition>>) -> Recognition {
    let mut merged = Recognition::default();
    let mut parts: Vec<String> = Vec::with_capacity(results.len());

    for (chunk, result) in chunks.iter().zip(results) {
        let Some(recognition) = result else { continue };
        let offset_secs = chunk.start_ms as f64 / 1000.0;
        if !recognition.text.is_empty() {
            parts.push(recognition.text);
        }
        for mut segment in recognition.segments {
            segment.offset_by(offset_secs);
            merged.segments.push(segment);
        }
        if chunk.index == 1 {
            merged.detected_language = recognition.detected_language;
        }
    }

    merged.text = parts.join(" ");
    merged
}

async fn set_volatile(coordinator: &JobCoordinator, job_id: JobId, update: VolatileUpdate) {
    if let Err(err) = coordinator
        .update(job_id, JobUpdate::Volatile(update))
        .await
    {
        tracing::debug!(job_id = %job_id, error = %err, "Volatile update dropped");
    }
}

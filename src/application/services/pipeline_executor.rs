use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    AudioProcessor, DurableUpdate, PunctuationRestorer, Recognition, SpeakerDiarizer,
    SpeechRecognizer,
};
use crate::application::services::chunk_coordinator::{ChunkCoordinator, ChunkError};
use crate::application::services::job_coordinator::{
    CoordinatorError, JobCoordinator, JobUpdate, VolatileUpdate,
};
use crate::domain::{Job, JobId, JobResult, JobStatus, Segment, assign_speakers};

#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Stage(String),
    #[error("{0}")]
    Coordinator(#[from] CoordinatorError),
}

/// Runs the ordered stage sequence for one job on a dispatched worker:
/// convert, recognize (chunked or whole-file), punctuate, speaker-merge,
/// finalize. Cancellation is checked at every stage boundary; any stage
/// error is caught at the top level so a job is never left in Processing.
pub struct PipelineExecutor {
    coordinator: Arc<JobCoordinator>,
    audio: Arc<dyn AudioProcessor>,
    recognizer: Arc<dyn SpeechRecognizer>,
    punctuator: Arc<dyn PunctuationRestorer>,
    diarizer: Option<Arc<dyn SpeakerDiarizer>>,
    chunk_workers: usize,
    archive_dir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(
        coordinator: Arc<JobCoordinator>,
        audio: Arc<dyn AudioProcessor>,
        recognizer: Arc<dyn SpeechRecognizer>,
        punctuator: Arc<dyn PunctuationRestorer>,
        diarizer: Option<Arc<dyn SpeakerDiarizer>>,
        chunk_workers: usize,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            audio,
            recognizer,
            punctuator,
            diarizer,
            chunk_workers,
            archive_dir: archive_dir.into(),
        }
    }

    /// Execute the whole pipeline for `job_id`. The terminal durable write
    /// always lands before resources are released, so a crash-free run can
    /// never leave a job stuck in Processing with no worker behind it.
    pub async fn run(&self, job_id: JobId) {
        let span = tracing::info_span!("transcription_job", job_id = %job_id);
        let _guard = span.enter();

        let outcome = self.execute(job_id).await;

        match outcome {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "Job completed");
            }
            Err(PipelineError::Cancelled) => {
                // Never leave the transient Canceling value behind.
                self.write_terminal(
                    job_id,
                    DurableUpdate::status(JobStatus::Cancelled).with_completed_at(Utc::now()),
                )
                .await;
                tracing::info!(job_id = %job_id, "Job cancelled");
            }
            Err(err) => {
                self.write_terminal(
                    job_id,
                    DurableUpdate::status(JobStatus::Failed)
                        .with_error(err.to_string())
                        .with_completed_at(Utc::now()),
                )
                .await;
                tracing::error!(job_id = %job_id, error = %err, "Job failed");
            }
        }

        self.coordinator.release_resources(job_id).await;
    }

    async fn execute(&self, job_id: JobId) -> Result<(), PipelineError> {
        let (token, job_dir) = self.coordinator.begin_execution(job_id).await?;
        let job = self.coordinator.load_job(job_id).await?;
        check_cancelled(&token)?;

        let source = self
            .coordinator
            .source_path(job_id)
            .ok_or_else(|| PipelineError::Stage("source audio missing".to_string()))?;

        // Stage 1: normalize to the recognizer's input format.
        self.set_volatile(job_id, VolatileUpdate::progress_text("Converting audio"))
            .await;
        let wav = job_dir.join("audio.wav");
        self.audio
            .convert_to_wav(&source, &wav)
            .await
            .map_err(|err| PipelineError::Stage(format!("audio conversion: {}", err)))?;
        self.set_volatile(job_id, VolatileUpdate::audio_converted())
            .await;
        check_cancelled(&token)?;

        // Stage 2: recognition, chunked or whole-file.
        self.set_volatile(job_id, VolatileUpdate::progress_text("Transcribing"))
            .await;
        let recognition = self
            .recognize(&job, job_id, &wav, &job_dir, &token)
            .await?;
        check_cancelled(&token)?;

        // Stage 3: punctuation restoration.
        let transcript = self
            .punctuate(&job, job_id, &recognition, &token)
            .await?;
        check_cancelled(&token)?;

        // Stage 4: optional speaker merge.
        let segments = self
            .diarize(&job, job_id, &wav, recognition.segments)
            .await?;
        check_cancelled(&token)?;

        // Stage 5: persist results, mark completed.
        self.set_volatile(job_id, VolatileUpdate::progress_text("Finalizing"))
            .await;
        let result = self
            .persist_results(&job, &transcript, &segments, &source)
            .await?;
        self.coordinator
            .update(
                job_id,
                JobUpdate::Durable(
                    DurableUpdate::status(JobStatus::Completed)
                        .with_result(result)
                        .with_completed_at(Utc::now()),
                ),
            )
            .await?;

        Ok(())
    }

    async fn recognize(
        &self,
        job: &Job,
        job_id: JobId,
        wav: &Path,
        job_dir: &Path,
        token: &CancellationToken,
    ) -> Result<Recognition, PipelineError> {
        let language = job.config.language.as_deref();

        if !job.config.chunking_enabled {
            return self
                .recognizer
                .recognize(wav, language, job_id)
                .await
                .map_err(|err| PipelineError::Stage(format!("recognition: {}", err)));
        }

        let duration_ms = self
            .audio
            .probe_duration_ms(wav)
            .await
            .map_err(|err| PipelineError::Stage(format!("audio probe: {}", err)))?;
        let chunk_ms = u64::from(job.config.chunk_duration_secs) * 1000;

        let chunker = ChunkCoordinator::new(
            Arc::clone(&self.audio),
            Arc::clone(&self.recognizer),
            self.chunk_workers,
        );
        chunker
            .transcribe(
                &self.coordinator,
                job_id,
                wav,
                duration_ms,
                chunk_ms,
                language,
                job_dir,
                token,
            )
            .await
            .map_err(|err| match err {
                ChunkError::Cancelled => PipelineError::Cancelled,
                ChunkError::Failed(msg) => PipelineError::Stage(format!("recognition: {}", msg)),
            })
    }

    async fn punctuate(
        &self,
        job: &Job,
        job_id: JobId,
        recognition: &Recognition,
        token: &CancellationToken,
    ) -> Result<String, PipelineError> {
        if job.config.punctuation_provider.is_none() || recognition.text.is_empty() {
            return Ok(recognition.text.clone());
        }
        check_cancelled(token)?;

        self.set_volatile(
            job_id,
            VolatileUpdate {
                punctuation_started: Some(true),
                progress_text: Some("Restoring punctuation".to_string()),
                ..VolatileUpdate::default()
            },
        )
        .await;

        let language = job
            .config
            .language
            .as_deref()
            .or(recognition.detected_language.as_deref());

        let coordinator = Arc::clone(&self.coordinator);
        let progress = move |current: u32, total: u32| {
            coordinator.note_punctuation_progress(job_id, current, total);
        };

        let restored = self
            .punctuator
            .restore(&recognition.text, language, &progress)
            .await
            .map_err(|err| PipelineError::Stage(format!("punctuation: {}", err)))?;

        self.set_volatile(
            job_id,
            VolatileUpdate {
                punctuation_completed: Some(true),
                ..VolatileUpdate::default()
            },
        )
        .await;

        Ok(restored)
    }

    async fn diarize(
        &self,
        job: &Job,
        job_id: JobId,
        wav: &Path,
        mut segments: Vec<Segment>,
    ) -> Result<Vec<Segment>, PipelineError> {
        if !job.config.diarization_enabled {
            return Ok(segments);
        }
        let Some(diarizer) = &self.diarizer else {
            return Ok(segments);
        };

        self.set_volatile(
            job_id,
            VolatileUpdate {
                diarization_started: Some(true),
                progress_text: Some("Identifying speakers".to_string()),
                ..VolatileUpdate::default()
            },
        )
        .await;

        let turns = diarizer
            .diarize(wav, job.config.max_speakers, job_id)
            .await
            .map_err(|err| PipelineError::Stage(format!("diarization: {}", err)))?;
        assign_speakers(&mut segments, &turns);

        self.set_volatile(
            job_id,
            VolatileUpdate {
                diarization_completed: Some(true),
                ..VolatileUpdate::default()
            },
        )
        .await;

        Ok(segments)
    }

    /// Write transcript and segments into the archive and, when requested,
    /// preserve the source audio. A preservation failure is logged and the
    /// job still completes.
    async fn persist_results(
        &self,
        job: &Job,
        transcript: &str,
        segments: &[Segment],
        source: &Path,
    ) -> Result<JobResult, PipelineError> {
        let dest_dir = self.archive_dir.join(job.id.to_string());
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .map_err(|err| PipelineError::Stage(format!("archive dir: {}", err)))?;

        let transcript_path = dest_dir.join("transcript.txt");
        tokio::fs::write(&transcript_path, transcript)
            .await
            .map_err(|err| PipelineError::Stage(format!("writing transcript: {}", err)))?;

        let segments_path = dest_dir.join("segments.json");
        let encoded = serde_json::to_vec_pretty(segments)
            .map_err(|err| PipelineError::Stage(format!("encoding segments: {}", err)))?;
        tokio::fs::write(&segments_path, encoded)
            .await
            .map_err(|err| PipelineError::Stage(format!("writing segments: {}", err)))?;

        let mut result = JobResult {
            transcript_ref: Some(transcript_path.to_string_lossy().into_owned()),
            segments_ref: Some(segments_path.to_string_lossy().into_owned()),
            audio_ref: None,
        };

        if job.keep_audio {
            let audio_path = dest_dir.join(&job.file.name);
            match tokio::fs::copy(source, &audio_path).await {
                Ok(_) => result.audio_ref = Some(audio_path.to_string_lossy().into_owned()),
                Err(err) => {
                    tracing::warn!(job_id = %job.id, error = %err, "Audio preservation failed");
                }
            }
        }

        Ok(result)
    }

    async fn write_terminal(&self, job_id: JobId, update: DurableUpdate) {
        if let Err(err) = self
            .coordinator
            .update(job_id, JobUpdate::Durable(update))
            .await
        {
            tracing::error!(job_id = %job_id, error = %err, "Terminal status write failed");
        }
    }

    async fn set_volatile(&self, job_id: JobId, update: VolatileUpdate) {
        if let Err(err) = self
            .coordinator
            .update(job_id, JobUpdate::Volatile(update))
            .await
        {
            tracing::debug!(job_id = %job_id, error = %err, "Volatile update dropped");
        }
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<(), PipelineError> {
    if token.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{JobId, SpeakerTurn};

#[derive(Debug, thiserror::Error)]
pub enum DiarizationError {
    #[error("diarization failed: {0}")]
    DiarizationFailed(String),
    #[error("diarization timed out: {0}")]
    Timeout(String),
}

/// Optional collaborator producing speaker turns for an audio file. Absence
/// of a diarizer simply disables the speaker-merge stage. Implementations
/// backed by a child process register it under `job` so cancellation can
/// terminate it.
#[async_trait]
pub trait SpeakerDiarizer: Send + Sync {
    async fn diarize(
        &self,
        audio: &Path,
        max_speakers: Option<u32>,
        job: JobId,
    ) -> Result<Vec<SpeakerTurn>, DiarizationError>;
}

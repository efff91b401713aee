use std::path::Path;

use async_trait::async_trait;

use crate::domain::{JobId, Segment};

/// Output of one recognition call over one audio file or chunk.
#[derive(Debug, Clone, Default)]
pub struct Recognition {
    pub text: String,
    pub segments: Vec<Segment>,
    pub detected_language: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecognizerError {
    #[error("audio unreadable: {0}")]
    InvalidAudio(String),
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),
    #[error("api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("recognition timed out: {0}")]
    Timeout(String),
}

/// Speech-to-text over a normalized WAV file. Implementations must be safe
/// to invoke concurrently for different chunks of the same job and may run
/// the actual work in a child process; `job` lets such implementations
/// register their worker with the coordinator's registry so it can be
/// force-terminated on cancellation.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(
        &self,
        audio: &Path,
        language: Option<&str>,
        job: JobId,
    ) -> Result<Recognition, RecognizerError>;
}

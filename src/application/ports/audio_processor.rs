use std::path::Path;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Format conversion and timeline slicing, normally an ffmpeg subprocess.
#[async_trait]
pub trait AudioProcessor: Send + Sync {
    async fn probe_duration_ms(&self, input: &Path) -> Result<u64, AudioError>;

    /// Convert to the recognizer's normalized format (16 kHz mono WAV).
    async fn convert_to_wav(&self, input: &Path, output: &Path) -> Result<(), AudioError>;

    /// Cut `[start_ms, start_ms + duration_ms)` out of a normalized WAV.
    async fn extract_segment(
        &self,
        input: &Path,
        output: &Path,
        start_ms: u64,
        duration_ms: u64,
    ) -> Result<(), AudioError>;
}

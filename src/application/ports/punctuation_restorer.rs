use async_trait::async_trait;

/// Progress callback: (restored sub-chunks, total sub-chunks).
pub type PunctuationProgress<'a> = &'a (dyn Fn(u32, u32) + Send + Sync);

#[derive(Debug, thiserror::Error)]
pub enum PunctuationError {
    #[error("quota exhausted across all keys and models: {0}")]
    QuotaExhausted(String),
    #[error("api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("request timed out: {0}")]
    Timeout(String),
}

/// Restores punctuation and casing in raw recognizer output. Long input is
/// sub-chunked internally; the callback fires after each sub-chunk so the
/// caller can surface fine-grained progress.
#[async_trait]
pub trait PunctuationRestorer: Send + Sync {
    async fn restore(
        &self,
        text: &str,
        language: Option<&str>,
        progress: PunctuationProgress<'_>,
    ) -> Result<String, PunctuationError>;
}

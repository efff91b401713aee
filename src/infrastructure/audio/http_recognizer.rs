use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;

use crate::application::ports::{Recognition, RecognizerError, SpeechRecognizer};
use crate::domain::{JobId, Segment};

/// Whisper-compatible HTTP transcription endpoint. Cheap to construct, so
/// each chunk worker can hold its own instance.
pub struct HttpSpeechRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

#[derive(Deserialize)]
struct TranscriptionSegment {
    start: f64,
    end: f64,
    text: String,
}

impl HttpSpeechRecognizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpSpeechRecognizer {
    async fn recognize(
        &self,
        audio: &Path,
        language: Option<&str>,
        _job: JobId,
    ) -> Result<Recognition, RecognizerError> {
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));

        let data = tokio::fs::read(audio)
            .await
            .map_err(|err| RecognizerError::InvalidAudio(format!("reading audio: {}", err)))?;

        let file_part = multipart::Part::bytes(data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|err| RecognizerError::ApiRequestFailed(format!("mime: {}", err)))?;

        let mut form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", file_part);
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        tracing::debug!(model = %self.model, audio = %audio.display(), "Sending audio chunk to recognizer");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RecognizerError::Timeout(err.to_string())
                } else {
                    RecognizerError::ApiRequestFailed(format!("request: {}", err))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RecognizerError::ApiRequestFailed(format!(
                "status {}: {}",
                status, body
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|err| RecognizerError::ApiRequestFailed(format!("parse response: {}", err)))?;

        let segments = parsed
            .segments
            .into_iter()
            .map(|s| Segment::new(s.start, s.end, s.text.trim()))
            .collect();

        Ok(Recognition {
            text: parsed.text.trim().to_string(),
            segments,
            detected_language: parsed.language,
        })
    }
}

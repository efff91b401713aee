use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::application::ports::{PunctuationError, PunctuationProgress, PunctuationRestorer};

const SYSTEM_PROMPT: &str = "Restore punctuation and capitalization in the transcript the user \
     provides. Do not rephrase, translate, or add anything; return only the corrected text.";

/// Chat-completions-backed punctuation restorer with a quota fallback chain:
/// on quota errors, keys rotate round-robin within the current model, then
/// the next model in the priority list takes over. The call errs with
/// QuotaExhausted only once every (key x model) combination has failed.
pub struct ChatPunctuationRestorer {
    client: reqwest::Client,
    base_url: String,
    api_keys: Vec<String>,
    models: Vec<String>,
    max_chunk_chars: usize,
    timeout_retries: u32,
}

enum SendError {
    Quota(String),
    Timeout(String),
    Other(String),
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl ChatPunctuationRestorer {
    pub fn new(
        base_url: impl Into<String>,
        api_keys: Vec<String>,
        models: Vec<String>,
        timeout: Duration,
        max_chunk_chars: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_keys,
            models,
            max_chunk_chars: max_chunk_chars.max(1),
            timeout_retries: 2,
        }
    }

    async fn restore_part(
        &self,
        part: &str,
        language: Option<&str>,
    ) -> Result<String, PunctuationError> {
        let mut last_quota = String::new();

        for model in &self.models {
            for key in &self.api_keys {
                let mut timeouts = 0u32;
                loop {
                    match self.send(model, key, part, language).await {
                        Ok(text) => return Ok(text),
                        Err(SendError::Quota(msg)) => {
                            tracing::warn!(model = %model, "Quota exhausted, rotating key");
                            last_quota = msg;
                            break;
                        }
                        Err(SendError::Timeout(msg)) => {
                            timeouts += 1;
                            if timeouts > self.timeout_retries {
                                return Err(PunctuationError::Timeout(msg));
                            }
                            tracing::warn!(model = %model, attempt = timeouts, "Punctuation call timed out, retrying");
                        }
                        Err(SendError::Other(msg)) => {
                            return Err(PunctuationError::ApiRequestFailed(msg));
                        }
                    }
                }
            }
        }

        Err(PunctuationError::QuotaExhausted(format!(
            "{} keys x {} models: {}",
            self.api_keys.len(),
            self.models.len(),
            last_quota
        )))
    }

    async fn send(
        &self,
        model: &str,
        key: &str,
        part: &str,
        language: Option<&str>,
    ) -> Result<String, SendError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let system = match language {
            Some(language) => format!("{} The transcript language is {}.", SYSTEM_PROMPT, language),
            None => SYSTEM_PROMPT.to_string(),
        };
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": part},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SendError::Timeout(err.to_string())
                } else {
                    SendError::Other(format!("request: {}", err))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status.as_u16() == 429 || body.contains("quota") {
                return Err(SendError::Quota(format!("status {}: {}", status, body)));
            }
            return Err(SendError::Other(format!("status {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| SendError::Other(format!("parse response: {}", err)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| SendError::Other("empty completion".to_string()))
    }
}

#[async_trait]
impl PunctuationRestorer for ChatPunctuationRestorer {
    async fn restore(
        &self,
        text: &str,
        language: Option<&str>,
        progress: PunctuationProgress<'_>,
    ) -> Result<String, PunctuationError> {
        let parts = split_text(text, self.max_chunk_chars);
        let total = parts.len() as u32;
        let mut restored = Vec::with_capacity(parts.len());

        for (done, part) in parts.iter().enumerate() {
            let output = self.restore_part(part, language).await?;
            restored.push(output);
            progress(done as u32 + 1, total);
        }

        Ok(restored.join(" "))
    }
}

/// Word-boundary split into pieces of at most `max_chars` (a single word
/// longer than the limit becomes its own piece).
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > max_chars {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

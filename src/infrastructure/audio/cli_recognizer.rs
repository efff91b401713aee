use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::application::ports::{Recognition, RecognizerError, SpeechRecognizer};
use crate::application::services::WorkerRegistry;
use crate::domain::{JobId, Segment};

/// Runs recognition in a child process, one per call. The worker loads its
/// own model copy, which keeps chunk workers fully isolated; the pid is
/// registered under the job so cancellation and the orphan sweep can
/// terminate it (the process itself is not interruptible).
///
/// Contract with the worker binary: it receives the WAV path (plus
/// `--language <code>` when known) and prints a JSON object
/// `{"text": ..., "language": ..., "segments": [{"start", "end", "text"}]}`
/// on stdout.
pub struct CliSpeechRecognizer {
    command: String,
    args: Vec<String>,
    registry: Arc<WorkerRegistry>,
}

#[derive(Deserialize)]
struct WorkerOutput {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<WorkerSegment>,
}

#[derive(Deserialize)]
struct WorkerSegment {
    start: f64,
    end: f64,
    text: String,
}

impl CliSpeechRecognizer {
    pub fn new(command: impl Into<String>, args: Vec<String>, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            command: command.into(),
            args,
            registry,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for CliSpeechRecognizer {
    async fn recognize(
        &self,
        audio: &Path,
        language: Option<&str>,
        job: JobId,
    ) -> Result<Recognition, RecognizerError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(audio)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // An aborted chunk task drops the child, which kills it; the
            // registry covers processes that outlive their task.
            .kill_on_drop(true);
        if let Some(language) = language {
            command.args(["--language", language]);
        }

        let child = command
            .spawn()
            .map_err(|err| RecognizerError::RecognitionFailed(format!("spawn worker: {}", err)))?;

        let pid = child.id();
        if let Some(pid) = pid {
            self.registry.register(job, pid);
            tracing::debug!(job_id = %job, pid, "Recognition worker spawned");
        }

        let output = child.wait_with_output().await;

        if let Some(pid) = pid {
            self.registry.deregister(job, pid);
        }

        let output = output
            .map_err(|err| RecognizerError::RecognitionFailed(format!("await worker: {}", err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognizerError::RecognitionFailed(format!(
                "worker exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let parsed: WorkerOutput = serde_json::from_slice(&output.stdout)
            .map_err(|err| RecognizerError::RecognitionFailed(format!("parse output: {}", err)))?;

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

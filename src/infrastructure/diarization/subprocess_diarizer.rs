use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::application::ports::{DiarizationError, SpeakerDiarizer};
use crate::application::services::WorkerRegistry;
use crate::domain::{JobId, SpeakerTurn};

/// Runs speaker diarization in a child process. The clustering model lives
/// entirely in the worker binary; this adapter only owns the process
/// lifecycle. The pid is registered under the job so `release_resources`
/// can terminate a diarizer that is still running when a job is cancelled.
///
/// Contract: the worker receives the WAV path (plus `--max-speakers <n>`)
/// and prints a JSON array `[{"start", "end", "speaker"}]` on stdout.
pub struct SubprocessDiarizer {
    command: String,
    args: Vec<String>,
    registry: Arc<WorkerRegistry>,
}

#[derive(Deserialize)]
struct TurnOutput {
    start: f64,
    end: f64,
    speaker: String,
}

impl SubprocessDiarizer {
    pub fn new(command: impl Into<String>, args: Vec<String>, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            command: command.into(),
            args,
            registry,
        }
    }
}

#[async_trait]
impl SpeakerDiarizer for SubprocessDiarizer {
    async fn diarize(
        &self,
        audio: &Path,
        max_speakers: Option<u32>,
        job: JobId,
    ) -> Result<Vec<SpeakerTurn>, DiarizationError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(audio)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(max) = max_speakers {
            command.args(["--max-speakers", &max.to_string()]);
        }

        let child = command
            .spawn()
            .map_err(|err| DiarizationError::DiarizationFailed(format!("spawn: {}", err)))?;

        let pid = child.id();
        if let Some(pid) = pid {
            self.registry.register(job, pid);
            tracing::debug!(job_id = %job, pid, "Diarization worker spawned");
        }

        let output = child.wait_with_output().await;

        if let Some(pid) = pid {
            self.registry.deregister(job, pid);
        }

        let output = output
            .map_err(|err| DiarizationError::DiarizationFailed(format!("await: {}", err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiarizationError::DiarizationFailed(format!(
                "worker exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let turns: Vec<TurnOutput> = serde_json::from_slice(&output.stdout)
            .map_err(|err| DiarizationError::DiarizationFailed(format!("parse output: {}", err)))?;

        Ok(turns
            .into_iter()
            .map(|t| SpeakerTurn {
                start: t.start,
                end: t.end,
                speaker: t.speaker,
            })
            .collect())
    }
}

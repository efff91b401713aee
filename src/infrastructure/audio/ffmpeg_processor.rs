use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::application::ports::{AudioError, AudioProcessor};

/// Shells out to ffmpeg/ffprobe for conversion and timeline cuts. Recognizers
/// expect 16 kHz mono WAV.
pub struct FfmpegAudioProcessor {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegAudioProcessor {
    pub fn new() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }

    pub fn with_binaries(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run_ffmpeg(&self, args: &[&str]) -> Result<(), AudioError> {
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AudioError::ConversionFailed(format!("spawning ffmpeg: {}", err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(AudioError::ConversionFailed(format!(
                "ffmpeg exited with {}: {}",
                output.status, tail
            )));
        }
        Ok(())
    }
}

impl Default for FfmpegAudioProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioProcessor for FfmpegAudioProcessor {
    async fn probe_duration_ms(&self, input: &Path) -> Result<u64, AudioError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AudioError::ProbeFailed(format!("spawning ffprobe: {}", err)))?;

        if !output.status.success() {
            return Err(AudioError::ProbeFailed(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let seconds: f64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|err| AudioError::ProbeFailed(format!("parsing duration: {}", err)))?;

        Ok((seconds * 1000.0).round() as u64)
    }

    async fn convert_to_wav(&self, input: &Path, output: &Path) -> Result<(), AudioError> {
        tracing::debug!(input = %input.display(), "Converting audio to 16kHz mono WAV");
        let input = input.to_string_lossy().into_owned();
        let output = output.to_string_lossy().into_owned();
        self.run_ffmpeg(&[
            "-y",
            "-i",
            input.as_str(),
            "-ac",
            "1",
            "-ar",
            "16000",
            "-f",
            "wav",
            output.as_str(),
        ])
        .await
    }

    async fn extract_segment(
        &self,
        input: &Path,
        output: &Path,
        start_ms: u64,
        duration_ms: u64,
    ) -> Result<(), AudioError> {
        let start = format!("{:.3}", start_ms as f64 / 1000.0);
        let duration = format!("{:.3}", duration_ms as f64 / 1000.0);
        let input = input.to_string_lossy().into_owned();
        let output = output.to_string_lossy().into_owned();
        self.run_ffmpeg(&[
            "-y",
            "-ss",
            start.as_str(),
            "-t",
            duration.as_str(),
            "-i",
            input.as_str(),
            "-ac",
            "1",
            "-ar",
            "16000",
            "-f",
            "wav",
            output.as_str(),
        ])
        .await
    }
}

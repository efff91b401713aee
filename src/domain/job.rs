use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobStatus, OwnerId};

/// Per-job pipeline configuration, fixed at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub chunking_enabled: bool,
    pub chunk_duration_secs: u32,
    pub punctuation_provider: Option<String>,
    pub diarization_enabled: bool,
    pub max_speakers: Option<u32>,
    pub language: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunking_enabled: true,
            chunk_duration_secs: 420,
            punctuation_provider: None,
            diarization_enabled: false,
            max_speakers: None,
            language: None,
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chunking_enabled && self.chunk_duration_secs == 0 {
            return Err("chunk_duration_secs must be positive when chunking is enabled".into());
        }
        if let Some(0) = self.max_speakers {
            return Err("max_speakers must be at least 1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
}

/// References to persisted outputs, filled in at finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub transcript_ref: Option<String>,
    pub segments_ref: Option<String>,
    pub audio_ref: Option<String>,
}

/// The durable job record. Mutated only by the coordinator and the pipeline
/// executor; survives process restarts, unlike the volatile progress state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub status: JobStatus,
    pub config: JobConfig,
    pub file: FileMeta,
    pub result: JobResult,
    pub tags: Vec<String>,
    pub keep_audio: bool,
    pub deleted: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(owner_id: OwnerId, config: JobConfig, file: FileMeta) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner_id,
            status: JobStatus::Pending,
            config,
            file,
            result: JobResult::default(),
            tags: Vec::new(),
            keep_audio: false,
            deleted: false,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

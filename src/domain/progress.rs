use super::{ChunkState, ChunkStatus, JobStatus};

/// Fixed stage weights. They always sum to 100; when chunking is disabled
/// the chunking and transcription weights are granted as one combined block.
pub const CONVERSION_WEIGHT: f64 = 5.0;
pub const CHUNKING_WEIGHT: f64 = 5.0;
pub const TRANSCRIPTION_WEIGHT: f64 = 77.0;
pub const PUNCTUATION_WEIGHT: f64 = 13.0;

/// Everything the progress model needs to know about one job. Built by the
/// coordinator from the merged durable + volatile view.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot<'a> {
    pub status: Option<JobStatus>,
    pub audio_converted: bool,
    pub chunks: &'a [ChunkState],
    pub punctuation_started: bool,
    pub punctuation_completed: bool,
    /// (current, total) sub-chunks when the restorer split long input.
    pub punctuation_progress: Option<(u32, u32)>,
}

/// Map a job snapshot to a percentage in [0, 100].
///
/// An in-flight chunk counts as half its share and a started-but-unfinished
/// punctuation pass is prorated by sub-chunk; both are heuristics whose only
/// guarantees are monotonicity, boundedness, and an exact 100 on completion.
pub fn percentage(snapshot: &ProgressSnapshot<'_>) -> f64 {
    if snapshot.status == Some(JobStatus::Completed) {
        return 100.0;
    }

    let mut total = 0.0;

    if snapshot.audio_converted {
        total += CONVERSION_WEIGHT;
    }

    if snapshot.chunks.is_empty() {
        // Whole-file recognition: the combined chunking + transcription
        // weight is granted in full once punctuation has taken over, half
        // while recognition is presumed still running.
        let combined = CHUNKING_WEIGHT + TRANSCRIPTION_WEIGHT;
        if snapshot.punctuation_started || snapshot.punctuation_completed {
            total += combined;
        } else if snapshot.audio_converted {
            total += combined / 2.0;
        }
    } else {
        let any_transition = snapshot
            .chunks
            .iter()
            .any(|c| c.status != ChunkStatus::Pending);
        if any_transition {
            total += CHUNKING_WEIGHT;
        }

        let share = TRANSCRIPTION_WEIGHT / snapshot.chunks.len() as f64;
        for chunk in snapshot.chunks {
            match chunk.status {
                ChunkStatus::Completed => total += share,
                ChunkStatus::Processing => total += share / 2.0,
                ChunkStatus::Pending | ChunkStatus::Failed => {}
            }
        }
    }

    if snapshot.punctuation_completed {
        total += PUNCTUATION_WEIGHT;
    } else if snapshot.punctuation_started {
        if let Some((current, total_subs)) = snapshot.punctuation_progress {
            if total_subs > 0 {
                total += PUNCTUATION_WEIGHT * f64::from(current) / f64::from(total_subs);
            }
        }
    }

    total.clamp(0.0, 100.0)
}

use skriva::domain::{ChunkState, ChunkStatus, JobStatus, ProgressSnapshot, percentage, plan_chunks};

fn chunks_with_statuses(statuses: &[ChunkStatus]) -> Vec<ChunkState> {
    let mut chunks = plan_chunks(statuses.len() as u64 * 60_000, 60_000);
    for (chunk, status) in chunks.iter_mut().zip(statuses) {
        chunk.status = *status;
    }
    chunks
}

#[test]
fn given_completed_status_when_computing_then_returns_exactly_one_hundred() {
    let snapshot = ProgressSnapshot {
        status: Some(JobStatus::Completed),
        ..ProgressSnapshot::default()
    };
    assert_eq!(percentage(&snapshot), 100.0);
}

#[test]
fn given_no_progress_when_computing_then_returns_zero() {
    let snapshot = ProgressSnapshot::default();
    assert_eq!(percentage(&snapshot), 0.0);
}

#[test]
fn given_unchunked_job_when_all_stages_finish_then_weights_close_to_one_hundred() {
    // conversion (5) + combined recognition (82) + punctuation (13)
    let snapshot = ProgressSnapshot {
        status: Some(JobStatus::Processing),
        audio_converted: true,
        punctuation_started: true,
        punctuation_completed: true,
        ..ProgressSnapshot::default()
    };
    assert_eq!(percentage(&snapshot), 100.0);
}

#[test]
fn given_unchunked_job_mid_recognition_when_computing_then_combined_weight_is_halved() {
    let snapshot = ProgressSnapshot {
        status: Some(JobStatus::Processing),
        audio_converted: true,
        ..ProgressSnapshot::default()
    };
    // 5 + 82/2
    assert_eq!(percentage(&snapshot), 46.0);
}

#[test]
fn given_all_chunks_completed_when_computing_then_transcription_weight_closes() {
    let chunks = chunks_with_statuses(&[
        ChunkStatus::Completed,
        ChunkStatus::Completed,
        ChunkStatus::Completed,
    ]);
    let snapshot = ProgressSnapshot {
        status: Some(JobStatus::Processing),
        audio_converted: true,
        chunks: &chunks,
        punctuation_started: true,
        punctuation_completed: true,
        ..ProgressSnapshot::default()
    };
    // 5 + 5 + 77 + 13
    assert!((percentage(&snapshot) - 100.0).abs() < 1e-9);
}

#[test]
fn given_processing_chunk_when_computing_then_counts_half_share() {
    let chunks = chunks_with_statuses(&[
        ChunkStatus::Completed,
        ChunkStatus::Processing,
        ChunkStatus::Pending,
    ]);
    let snapshot = ProgressSnapshot {
        status: Some(JobStatus::Processing),
        audio_converted: true,
        chunks: &chunks,
        ..ProgressSnapshot::default()
    };
    let share = 77.0 / 3.0;
    let expected = 5.0 + 5.0 + share + share / 2.0;
    assert!((percentage(&snapshot) - expected).abs() < 1e-9);
}

#[test]
fn given_pending_chunks_only_when_computing_then_chunking_weight_is_withheld() {
    let chunks = chunks_with_statuses(&[ChunkStatus::Pending, ChunkStatus::Pending]);
    let snapshot = ProgressSnapshot {
        status: Some(JobStatus::Processing),
        audio_converted: true,
        chunks: &chunks,
        ..ProgressSnapshot::default()
    };
    assert_eq!(percentage(&snapshot), 5.0);
}

#[test]
fn given_punctuation_sub_chunks_when_computing_then_weight_is_prorated() {
    let snapshot = ProgressSnapshot {
        status: Some(JobStatus::Processing),
        audio_converted: true,
        punctuation_started: true,
        punctuation_progress: Some((1, 2)),
        ..ProgressSnapshot::default()
    };
    // 5 + 82 (punctuation started implies recognition done) + 13/2
    assert!((percentage(&snapshot) - 93.5).abs() < 1e-9);
}

#[test]
fn given_staged_updates_when_replayed_in_order_then_percentage_never_decreases() {
    let stages = [
        ProgressSnapshot::default(),
        ProgressSnapshot {
            audio_converted: true,
            ..ProgressSnapshot::default()
        },
        ProgressSnapshot {
            audio_converted: true,
            punctuation_started: true,
            ..ProgressSnapshot::default()
        },
        ProgressSnapshot {
            audio_converted: true,
            punctuation_started: true,
            punctuation_progress: Some((1, 2)),
            ..ProgressSnapshot::default()
        },
        ProgressSnapshot {
            audio_converted: true,
            punctuation_started: true,
            punctuation_completed: true,
            ..ProgressSnapshot::default()
        },
        ProgressSnapshot {
            status: Some(JobStatus::Completed),
            audio_converted: true,
            punctuation_started: true,
            punctuation_completed: true,
            ..ProgressSnapshot::default()
        },
    ];

    let mut previous = -1.0;
    for snapshot in &stages {
        let current = percentage(snapshot);
        assert!(
            current >= previous,
            "progress regressed: {} -> {}",
            previous,
            current
        );
        previous = current;
    }
    assert_eq!(previous, 100.0);
}

use std::sync::Arc;
use std::time::Duration;

use skriva::application::ports::{SpeakerDiarizer, SpeechRecognizer};
use skriva::application::services::PipelineExecutor;
use skriva::domain::{ChunkStatus, JobConfig, JobStatus, OwnerId, Segment, SpeakerTurn};

use crate::common::{StubAudioProcessor, StubDiarizer, StubPunctuator, StubRecognizer, TestEnv,
    submit_job, test_env};

const MINUTE_MS: u64 = 60 * 1000;

fn executor(
    env: &TestEnv,
    audio_ms: u64,
    recognizer: Arc<dyn SpeechRecognizer>,
    diarizer: Option<Arc<dyn SpeakerDiarizer>>,
    chunk_workers: usize,
) -> Arc<PipelineExecutor> {
    Arc::new(PipelineExecutor::new(
        Arc::clone(&env.coordinator),
        Arc::new(StubAudioProcessor {
            duration_ms: audio_ms,
        }),
        recognizer,
        Arc::new(StubPunctuator),
        diarizer,
        chunk_workers,
        env.archive.path(),
    ))
}

async fn read_segments(path: &str) -> Vec<Segment> {
    let raw = tokio::fs::read(path).await.expect("segments file");
    serde_json::from_slice(&raw).expect("segments json")
}

#[tokio::test]
async fn given_unchunked_job_when_pipeline_runs_then_job_completes_with_persisted_results() {
    let env = test_env();
    let owner = OwnerId::new();
    let config = JobConfig {
        chunking_enabled: false,
        punctuation_provider: Some("openai".to_string()),
        ..JobConfig::default()
    };
    let job = submit_job(&env, owner, config, false).await;

    executor(&env, 30_000, Arc::new(StubRecognizer::default()), None, 1)
        .run(job.id)
        .await;

    let stored = env.coordinator.load_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.error.is_none());
    assert!(stored.completed_at.is_some());

    let transcript_ref = stored.result.transcript_ref.expect("transcript ref");
    let transcript = tokio::fs::read_to_string(&transcript_ref).await.unwrap();
    assert_eq!(transcript, "part 0 text.");

    let segments = read_segments(&stored.result.segments_ref.expect("segments ref")).await;
    assert_eq!(segments.len(), 1);

    // Volatile state is gone, temp dir is gone, view snaps to 100.
    assert!(!env.work.path().join(job.id.to_string()).exists());
    let view = env.coordinator.get(job.id, owner).await.unwrap();
    assert_eq!(view.progress_percentage, 100.0);
}

#[tokio::test]
async fn given_twenty_minute_file_when_chunked_with_three_workers_then_merge_offsets_apply() {
    let env = test_env();
    let owner = OwnerId::new();
    let config = JobConfig {
        chunking_enabled: true,
        chunk_duration_secs: 7 * 60,
        ..JobConfig::default()
    };
    let job = submit_job(&env, owner, config, false).await;

    let (recognizer, release) = StubRecognizer::gated();
    let exec = executor(&env, 20 * MINUTE_MS, Arc::new(recognizer), None, 3);

    let run = {
        let exec = Arc::clone(&exec);
        let job_id = job.id;
        tokio::spawn(async move { exec.run(job_id).await })
    };

    // processing_count reaches 3 before any chunk completes.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(view) = env.coordinator.get(job.id, owner).await {
                let processing = view
                    .chunks
                    .iter()
                    .filter(|c| c.status == ChunkStatus::Processing)
                    .count();
                let completed = view
                    .chunks
                    .iter()
                    .filter(|c| c.status == ChunkStatus::Completed)
                    .count();
                if processing == 3 {
                    assert_eq!(completed, 0);
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all three chunks in flight");

    release.send(true).unwrap();
    run.await.unwrap();

    let stored = env.coordinator.load_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);

    let transcript_ref = stored.result.transcript_ref.expect("transcript ref");
    let transcript = tokio::fs::read_to_string(&transcript_ref).await.unwrap();
    assert_eq!(transcript, "part 1 text part 2 text part 3 text");

    let segments = read_segments(&stored.result.segments_ref.expect("segments ref")).await;
    assert_eq!(segments.len(), 3);
    // Chunk 3 runs from minute 14: local timestamps shifted by +14min.
    assert_eq!(segments[2].start, 14.0 * 60.0);
    assert_eq!(segments[2].end, 14.0 * 60.0 + 5.0);
}

#[tokio::test]
async fn given_failing_chunk_when_pipeline_runs_then_job_fails_with_single_error_and_cleanup() {
    let env = test_env();
    let owner = OwnerId::new();
    let config = JobConfig {
        chunking_enabled: true,
        chunk_duration_secs: 60,
        ..JobConfig::default()
    };
    let job = submit_job(&env, owner, config, false).await;

    let recognizer = StubRecognizer {
        fail_index: Some(2),
        ..StubRecognizer::default()
    };
    executor(&env, 3 * MINUTE_MS, Arc::new(recognizer), None, 3)
        .run(job.id)
        .await;

    let stored = env.coordinator.load_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    let error = stored.error.expect("error string");
    assert!(error.contains("chunk 2"));
    assert!(!env.work.path().join(job.id.to_string()).exists());
}

#[tokio::test]
async fn given_cancellation_mid_recognition_when_pipeline_runs_then_status_is_cancelled_not_failed()
{
    let env = test_env();
    let owner = OwnerId::new();
    let config = JobConfig {
        chunking_enabled: true,
        chunk_duration_secs: 60,
        ..JobConfig::default()
    };
    let job = submit_job(&env, owner, config, false).await;

    let (recognizer, _release) = StubRecognizer::gated();
    let exec = executor(&env, 3 * MINUTE_MS, Arc::new(recognizer), None, 2);

    let run = {
        let exec = Arc::clone(&exec);
        let job_id = job.id;
        tokio::spawn(async move { exec.run(job_id).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(view) = env.coordinator.get(job.id, owner).await {
                if view
                    .chunks
                    .iter()
                    .any(|c| c.status == ChunkStatus::Processing)
                {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recognition in flight");

    env.coordinator.request_cancellation(job.id).await;
    run.await.unwrap();

    let stored = env.coordinator.load_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.error.is_none());
    assert!(!env.work.path().join(job.id.to_string()).exists());
}

#[tokio::test]
async fn given_diarization_enabled_when_pipeline_runs_then_segments_carry_speaker_labels() {
    let env = test_env();
    let owner = OwnerId::new();
    let config = JobConfig {
        chunking_enabled: false,
        diarization_enabled: true,
        max_speakers: Some(2),
        ..JobConfig::default()
    };
    let job = submit_job(&env, owner, config, false).await;

    let diarizer = StubDiarizer {
        turns: vec![
            SpeakerTurn {
                start: 0.0,
                end: 6.0,
                speaker: "SPEAKER_00".to_string(),
            },
            SpeakerTurn {
                start: 6.0,
                end: 30.0,
                speaker: "SPEAKER_01".to_string(),
            },
        ],
    };
    executor(
        &env,
        30_000,
        Arc::new(StubRecognizer::default()),
        Some(Arc::new(diarizer)),
        1,
    )
    .run(job.id)
    .await;

    let stored = env.coordinator.load_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);

    let segments = read_segments(&stored.result.segments_ref.expect("segments ref")).await;
    assert_eq!(segments[0].speaker.as_deref(), Some("SPEAKER_00"));
}

#[tokio::test]
async fn given_keep_audio_when_pipeline_completes_then_source_is_preserved_in_archive() {
    let env = test_env();
    let owner = OwnerId::new();
    let config = JobConfig {
        chunking_enabled: false,
        ..JobConfig::default()
    };
    let job = submit_job(&env, owner, config, true).await;

    executor(&env, 30_000, Arc::new(StubRecognizer::default()), None, 1)
        .run(job.id)
        .await;

    let stored = env.coordinator.load_job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);

    let audio_ref = stored.result.audio_ref.expect("audio ref");
    assert!(tokio::fs::try_exists(&audio_ref).await.unwrap());
    assert!(audio_ref.ends_with("upload.mp3"));
}

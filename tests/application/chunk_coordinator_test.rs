use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use skriva::application::services::{ChunkCoordinator, ChunkError};
use skriva::domain::{ChunkStatus, JobConfig, OwnerId};

use crate::common::{StubAudioProcessor, StubRecognizer, submit_job, test_env};

const MINUTE_MS: u64 = 60 * 1000;

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn given_chunks_completing_out_of_order_when_merging_then_output_is_index_ordered() {
    let env = test_env();
    let owner = OwnerId::new();
    let job = submit_job(&env, owner, JobConfig::default(), false).await;
    let (token, job_dir) = env.coordinator.begin_execution(job.id).await.unwrap();
    let wav = job_dir.join("audio.wav");
    tokio::fs::write(&wav, b"wav").await.unwrap();

    // Chunk 1 finishes last; the merge must not care.
    let recognizer = StubRecognizer {
        delays_ms: HashMap::from([(1, 150u64)]),
        ..StubRecognizer::default()
    };
    let chunker = ChunkCoordinator::new(
        Arc::new(StubAudioProcessor {
            duration_ms: 3 * MINUTE_MS,
        }),
        Arc::new(recognizer),
        3,
    );

    let merged = chunker
        .transcribe(
            &env.coordinator,
            job.id,
            &wav,
            3 * MINUTE_MS,
            MINUTE_MS,
            None,
            &job_dir,
            &token,
        )
        .await
        .expect("merged recognition");

    assert_eq!(merged.text, "part 1 text part 2 text part 3 text");
    assert_eq!(merged.detected_language.as_deref(), Some("en"));
    assert_eq!(merged.segments.len(), 3);
    assert_eq!(merged.segments[0].start, 0.0);
    assert_eq!(merged.segments[1].start, 60.0);
    assert_eq!(merged.segments[2].start, 120.0);
}

#[tokio::test]
async fn given_three_workers_when_fanning_out_then_all_chunks_process_before_any_completion() {
    let env = test_env();
    let owner = OwnerId::new();
    let job = submit_job(&env, owner, JobConfig::default(), false).await;
    let (token, job_dir) = env.coordinator.begin_execution(job.id).await.unwrap();
    let wav = job_dir.join("audio.wav");
    tokio::fs::write(&wav, b"wav").await.unwrap();

    let (recognizer, release) = StubRecognizer::gated();
    let chunker = ChunkCoordinator::new(
        Arc::new(StubAudioProcessor {
            duration_ms: 20 * MINUTE_MS,
        }),
        Arc::new(recognizer),
        3,
    );

    let coordinator = Arc::clone(&env.coordinator);
    let wav_task = wav.clone();
    let dir_task = job_dir.clone();
    let token_task = token.clone();
    let job_id = job.id;
    let handle = tokio::spawn(async move {
        chunker
            .transcribe(
                &coordinator,
                job_id,
                &wav_task,
                20 * MINUTE_MS,
                7 * MINUTE_MS,
                None,
                &dir_task,
                &token_task,
            )
            .await
    });

    // All three chunks go in flight while the gate is closed.
    wait_for(|| {
        let coordinator = Arc::clone(&env.coordinator);
        async move {
            let Ok(view) = coordinator.get(job_id, owner).await else {
                return false;
            };
            view.chunks
                .iter()
                .filter(|c| c.status == ChunkStatus::Processing)
                .count()
                == 3
        }
    })
    .await;

    let view = env.coordinator.get(job_id, owner).await.unwrap();
    assert_eq!(view.chunks.len(), 3);
    assert!(
        view.chunks
            .iter()
            .all(|c| c.status != ChunkStatus::Completed)
    );

    release.send(true).unwrap();
    let merged = handle.await.unwrap().expect("merged recognition");

    // Chunk 3 covers minutes 14..20: local times shift by +14 minutes.
    assert_eq!(merged.segments[2].start, 14.0 * 60.0);
    assert_eq!(merged.segments[2].end, 14.0 * 60.0 + 5.0);

    let view = env.coordinator.get(job_id, owner).await.unwrap();
    assert!(
        view.chunks
            .iter()
            .all(|c| c.status == ChunkStatus::Completed)
    );
}

#[tokio::test]
async fn given_one_failing_chunk_when_running_then_single_failure_propagates_and_files_are_removed()
{
    let env = test_env();
    let owner = OwnerId::new();
    let job = submit_job(&env, owner, JobConfig::default(), false).await;
    let (token, job_dir) = env.coordinator.begin_execution(job.id).await.unwrap();
    let wav = job_dir.join("audio.wav");
    tokio::fs::write(&wav, b"wav").await.unwrap();

    let recognizer = StubRecognizer {
        fail_index: Some(2),
        ..StubRecognizer::default()
    };
    let chunker = ChunkCoordinator::new(
        Arc::new(StubAudioProcessor {
            duration_ms: 3 * MINUTE_MS,
        }),
        Arc::new(recognizer),
        3,
    );

    let result = chunker
        .transcribe(
            &env.coordinator,
            job.id,
            &wav,
            3 * MINUTE_MS,
            MINUTE_MS,
            None,
            &job_dir,
            &token,
        )
        .await;

    match result {
        Err(ChunkError::Failed(message)) => assert!(message.contains("chunk 2")),
        other => panic!("expected aggregate failure, got {:?}", other.map(|r| r.text)),
    }
    assert!(!job_dir.join("chunks").exists());

    let view = env.coordinator.get(job.id, owner).await.unwrap();
    assert!(
        view.chunks
            .iter()
            .any(|c| c.index == 2 && c.status == ChunkStatus::Failed)
    );
}

#[tokio::test]
async fn given_cancellation_mid_flight_when_waiting_then_coordinator_raises_cancelled() {
    let env = test_env();
    let owner = OwnerId::new();
    let job = submit_job(&env, owner, JobConfig::default(), false).await;
    let (token, job_dir) = env.coordinator.begin_execution(job.id).await.unwrap();
    let wav = job_dir.join("audio.wav");
    tokio::fs::write(&wav, b"wav").await.unwrap();

    let (recognizer, _release) = StubRecognizer::gated();
    let chunker = ChunkCoordinator::new(
        Arc::new(StubAudioProcessor {
            duration_ms: 3 * MINUTE_MS,
        }),
        Arc::new(recognizer),
        2,
    );

    let coordinator = Arc::clone(&env.coordinator);
    let wav_task = wav.clone();
    let dir_task = job_dir.clone();
    let token_task = token.clone();
    let job_id = job.id;
    let handle = tokio::spawn(async move {
        chunker
            .transcribe(
                &coordinator,
                job_id,
                &wav_task,
                3 * MINUTE_MS,
                MINUTE_MS,
                None,
                &dir_task,
                &token_task,
            )
            .await
    });

    wait_for(|| {
        let coordinator = Arc::clone(&env.coordinator);
        async move {
            let Ok(view) = coordinator.get(job_id, owner).await else {
                return false;
            };
            view.chunks
                .iter()
                .any(|c| c.status == ChunkStatus::Processing)
        }
    })
    .await;

    env.coordinator.request_cancellation(job_id).await;

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ChunkError::Cancelled)));
    assert!(!job_dir.join("chunks").exists());
}

#[tokio::test]
async fn given_short_file_when_transcribing_then_pool_is_bypassed() {
    let env = test_env();
    let owner = OwnerId::new();
    let job = submit_job(&env, owner, JobConfig::default(), false).await;
    let (token, job_dir) = env.coordinator.begin_execution(job.id).await.unwrap();
    let wav = job_dir.join("audio.wav");
    tokio::fs::write(&wav, b"wav").await.unwrap();

    let recognizer = Arc::new(StubRecognizer::default());
    let chunker = ChunkCoordinator::new(
        Arc::new(StubAudioProcessor {
            duration_ms: 30_000,
        }),
        Arc::clone(&recognizer) as Arc<dyn skriva::application::ports::SpeechRecognizer>,
        3,
    );

    let merged = chunker
        .transcribe(
            &env.coordinator,
            job.id,
            &wav,
            30_000,
            MINUTE_MS,
            None,
            &job_dir,
            &token,
        )
        .await
        .expect("single-chunk recognition");

    assert_eq!(merged.text, "part 0 text");
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);

    let view = env.coordinator.get(job.id, owner).await.unwrap();
    assert!(view.chunks.is_empty());
}

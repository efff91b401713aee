use std::sync::Arc;
use std::time::Duration;

use skriva::application::ports::{JobStore, PunctuationRestorer, SpeakerDiarizer, SpeechRecognizer};
use skriva::application::services::{JobCoordinator, PipelineExecutor};
use skriva::config::Settings;
use skriva::infrastructure::audio::{
    CliSpeechRecognizer, FfmpegAudioProcessor, HttpSpeechRecognizer,
};
use skriva::infrastructure::diarization::SubprocessDiarizer;
use skriva::infrastructure::llm::ChatPunctuationRestorer;
use skriva::infrastructure::observability::{TracingConfig, init_tracing};
use skriva::infrastructure::persistence::{MemoryJobStore, PgJobStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(TracingConfig::default());
    let settings = Settings::from_env();

    tokio::fs::create_dir_all(&settings.work_dir).await?;
    tokio::fs::create_dir_all(&settings.archive_dir).await?;

    let store: Arc<dyn JobStore> = match &settings.database_url {
        Some(url) => Arc::new(PgJobStore::connect(url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, jobs will not survive restarts");
            Arc::new(MemoryJobStore::new())
        }
    };

    let coordinator = Arc::new(JobCoordinator::new(Arc::clone(&store), &settings.work_dir));

    // Jobs left mid-flight by a previous process can never resume: their
    // volatile state is gone. Fail them before admitting anything new.
    let swept = coordinator.sweep_orphans().await?;
    if swept > 0 {
        tracing::warn!(swept, "Failed orphaned jobs from previous run");
    }

    let registry = coordinator.worker_registry();
    let audio = Arc::new(FfmpegAudioProcessor::new());

    let recognizer: Arc<dyn SpeechRecognizer> = match &settings.recognizer.command {
        Some(command) => Arc::new(CliSpeechRecognizer::new(
            command.clone(),
            Vec::new(),
            Arc::clone(&registry),
        )),
        None => Arc::new(HttpSpeechRecognizer::new(
            settings.recognizer.base_url.clone(),
            settings.recognizer.api_key.clone(),
            settings.recognizer.model.clone(),
            Duration::from_secs(settings.recognizer.timeout_secs),
        )),
    };

    let punctuator: Arc<dyn PunctuationRestorer> = Arc::new(ChatPunctuationRestorer::new(
        settings.punctuation.base_url.clone(),
        settings.punctuation.api_keys.clone(),
        settings.punctuation.models.clone(),
        Duration::from_secs(settings.punctuation.timeout_secs),
        settings.punctuation.max_chunk_chars,
    ));

    let diarizer: Option<Arc<dyn SpeakerDiarizer>> = settings.diarizer_command.as_ref().map(
        |command| -> Arc<dyn SpeakerDiarizer> {
            Arc::new(SubprocessDiarizer::new(
                command.clone(),
                Vec::new(),
                Arc::clone(&registry),
            ))
        },
    );

    let executor = Arc::new(PipelineExecutor::new(
        Arc::clone(&coordinator),
        audio,
        recognizer,
        punctuator,
        diarizer,
        settings.chunk_workers,
        &settings.archive_dir,
    ));

    // Periodic guard against leaked recognition/diarization processes.
    {
        let coordinator = Arc::clone(&coordinator);
        let interval = Duration::from_secs(settings.worker_sweep_interval_secs.max(1));
        let grace = Duration::from_secs(settings.worker_grace_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                coordinator.sweep_orphaned_workers(grace).await;
            }
        });
    }

    tracing::info!(
        max_concurrent_jobs = settings.max_concurrent_jobs,
        chunk_workers = settings.chunk_workers,
        "Admission loop started"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut poll = tokio::time::interval(Duration::from_millis(settings.admission_poll_ms.max(50)));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = poll.tick() => {
                admit_if_capacity(&coordinator, &executor, settings.max_concurrent_jobs).await;
            }
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

async fn admit_if_capacity(
    coordinator: &Arc<JobCoordinator>,
    executor: &Arc<PipelineExecutor>,
    max_concurrent: usize,
) {
    let processing = match coordinator.count_processing().await {
        Ok(count) => count,
        Err(err) => {
            tracing::error!(error = %err, "Counting processing jobs failed");
            return;
        }
    };
    if processing as usize >= max_concurrent {
        return;
    }

    match coordinator.admit_next().await {
        Ok(Some(job_id)) => {
            let executor = Arc::clone(executor);
            tokio::spawn(async move {
                executor.run(job_id).await;
            });
        }
        Ok(None) => {}
        Err(err) => tracing::error!(error = %err, "Job admission failed"),
    }
}

/// Wait for SIGTERM (systemd) or ctrl-c.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!(error = %err, "Failed to register SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

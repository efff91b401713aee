use std::path::PathBuf;

/// Process configuration, populated from environment variables with
/// defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct Settings {
    pub work_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// Whole pipelines executing at once.
    pub max_concurrent_jobs: usize,
    /// Chunk recognition workers within one pipeline.
    pub chunk_workers: usize,
    pub default_chunk_duration_secs: u32,
    pub admission_poll_ms: u64,
    pub worker_sweep_interval_secs: u64,
    pub worker_grace_secs: u64,
    pub database_url: Option<String>,
    pub recognizer: RecognizerSettings,
    pub punctuation: PunctuationSettings,
    pub diarizer_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecognizerSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// When set, recognition runs in this worker command instead of over
    /// HTTP.
    pub command: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PunctuationSettings {
    pub base_url: String,
    /// Rotated round-robin within each model on quota errors.
    pub api_keys: Vec<String>,
    /// Priority-ordered fallback models.
    pub models: Vec<String>,
    pub timeout_secs: u64,
    pub max_chunk_chars: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        let work_dir = env_path("SKRIVA_WORK_DIR", || std::env::temp_dir().join("skriva/work"));
        let archive_dir = env_path("SKRIVA_ARCHIVE_DIR", || {
            std::env::temp_dir().join("skriva/archive")
        });

        Self {
            work_dir,
            archive_dir,
            max_concurrent_jobs: env_parse("SKRIVA_MAX_CONCURRENT_JOBS", 2),
            chunk_workers: env_parse("SKRIVA_CHUNK_WORKERS", 3),
            default_chunk_duration_secs: env_parse("SKRIVA_CHUNK_DURATION_SECS", 420),
            admission_poll_ms: env_parse("SKRIVA_ADMISSION_POLL_MS", 500),
            worker_sweep_interval_secs: env_parse("SKRIVA_WORKER_SWEEP_SECS", 60),
            worker_grace_secs: env_parse("SKRIVA_WORKER_GRACE_SECS", 5),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            recognizer: RecognizerSettings {
                base_url: env_string("SKRIVA_RECOGNIZER_URL", "https://api.openai.com/v1"),
                api_key: env_string("SKRIVA_RECOGNIZER_API_KEY", ""),
                model: env_string("SKRIVA_RECOGNIZER_MODEL", "whisper-1"),
                command: std::env::var("SKRIVA_RECOGNIZER_COMMAND")
                    .ok()
                    .filter(|v| !v.is_empty()),
                timeout_secs: env_parse("SKRIVA_RECOGNIZER_TIMEOUT_SECS", 600),
            },
            punctuation: PunctuationSettings {
                base_url: env_string("SKRIVA_PUNCTUATION_URL", "https://api.openai.com/v1"),
                api_keys: env_list("SKRIVA_PUNCTUATION_API_KEYS"),
                models: {
                    let models = env_list("SKRIVA_PUNCTUATION_MODELS");
                    if models.is_empty() {
                        vec!["gpt-4o-mini".to_string()]
                    } else {
                        models
                    }
                },
                timeout_secs: env_parse("SKRIVA_PUNCTUATION_TIMEOUT_SECS", 120),
                max_chunk_chars: env_parse("SKRIVA_PUNCTUATION_CHUNK_CHARS", 8000),
            },
            diarizer_command: std::env::var("SKRIVA_DIARIZER_COMMAND")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| default())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; empty entries are dropped.
fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub mod audio;
pub mod diarization;
pub mod llm;
pub mod observability;
pub mod persistence;

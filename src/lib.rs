//! skriva: background audio-transcription job orchestration.
//!
//! Turns an uploaded audio file into a finished transcript through a staged
//! pipeline (format conversion, optionally chunked speech recognition,
//! punctuation restoration, optional speaker merge) while tracking progress
//! across a durable record and in-process volatile state, honoring
//! cancellation, and cleaning up temp resources tied to job outcome.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

mod subprocess_diarizer;

pub use subprocess_diarizer::SubprocessDiarizer;

mod cli_recognizer;
mod ffmpeg_processor;
mod http_recognizer;

pub use cli_recognizer::CliSpeechRecognizer;
pub use ffmpeg_processor::FfmpegAudioProcessor;
pub use http_recognizer::HttpSpeechRecognizer;

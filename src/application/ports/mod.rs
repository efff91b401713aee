mod audio_processor;
mod job_store;
mod punctuation_restorer;
mod speaker_diarizer;
mod speech_recognizer;

pub use audio_processor::{AudioError, AudioProcessor};
pub use job_store::{DurableUpdate, JobStore, JobStoreError};
pub use punctuation_restorer::{PunctuationError, PunctuationProgress, PunctuationRestorer};
pub use speaker_diarizer::{DiarizationError, SpeakerDiarizer};
pub use speech_recognizer::{Recognition, RecognizerError, SpeechRecognizer};

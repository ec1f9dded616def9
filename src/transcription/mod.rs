/// Model download and management
pub mod download;
/// Speech engine and lazy load guard
pub mod engine;
/// Background transcription pipeline
pub mod worker;

pub use download::ensure_model_downloaded;
pub use engine::{LazyEngine, SpeechEngine, TranscriptionError, WhisperEngine};
pub use worker::{JobOutcome, TranscriptionJob};

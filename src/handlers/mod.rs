//! Derived sensor handlers: speech intent, utterance segmentation,
//! transcription and emotion recognition.
//!
//! Model inference lives behind the [`Transcriber`], [`EmotionClassifier`]
//! and [`VoiceActivityDetector`] seams; the handlers own only the buffering
//! and timing logic.

pub mod emotion;
pub mod speech_intent;
pub mod speech_segment;
pub mod transcription;

pub use emotion::{
    EmotionClassifier, EmotionHandler, FaceRegionClassifier, FacialExpressionHandler,
    SpeechEmotionHandler,
};
pub use speech_intent::{EnergyVad, IntentInput, SpeechIntentDetector, VoiceActivityDetector};
pub use speech_segment::{SegmentInput, SpeechSegmenter};
pub use transcription::{FixedTranscriber, Transcriber, TranscriptionHandler};

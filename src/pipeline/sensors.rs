//! Standard sensor graph: microphone and camera in, question and emotion
//! streams out.
//!
//! ```text
//!  faces ──┬─▶ speech-intent ─┐
//!          │                  ▼
//!  audio ──┴──────────▶ speech-segmenter ──┬─▶ transcription ─▶ question
//!    ▲                                     ├─▶ speech-emotion
//!    └──── paused while an answer plays ◀──┘
//!  faces ────▶ facial-expression
//! ```
//!
//! The microphone is resumed by the sink's speech-ended signal, by a failed
//! cycle, or by an utterance that transcribed to nothing. Vocal emotion
//! always reports back (empty scores when unclassified) so a cycle awaiting
//! it is never held forever.

use crate::agent::ChatAgent;
use crate::config::FusionConfig;
use crate::error::Result;
use crate::handlers::{
    EmotionClassifier, EmotionHandler, FacialExpressionHandler, SpeechEmotionHandler,
    SpeechIntentDetector, SpeechSegmenter, Transcriber, TranscriptionHandler,
    VoiceActivityDetector,
};
use crate::pipeline::backpressure::{pause_on, resume_on, resume_when};
use crate::pipeline::completion::AwaitSource;
use crate::pipeline::coordinator::{CycleOutcome, FusionOrchestrator};
use crate::pipeline::messages::{
    AudioChunk, EmotionScores, FaceObservation, SpeechIntent, SpeechSegment,
};
use crate::prompt::{AnimationCatalogue, EmotionPromptBuilder};
use crate::sink::OutputSink;
use crate::stream::handler::StreamHandler;
use crate::stream::{StreamSource, Subscription};
use crate::transcript::Transcript;
use std::sync::Arc;
use tracing::info;

/// Model backends the graph delegates to.
pub struct SensorBackends {
    pub vad: Box<dyn VoiceActivityDetector>,
    pub transcriber: Box<dyn Transcriber>,
    pub facial_expression: Box<dyn EmotionClassifier<FaceObservation>>,
    pub speech_emotion: Box<dyn EmotionClassifier<SpeechSegment>>,
}

pub struct SensorGraph {
    audio: StreamSource<AudioChunk>,
    intent: StreamHandler<SpeechIntentDetector>,
    segmenter: StreamHandler<SpeechSegmenter>,
    transcription: StreamHandler<TranscriptionHandler>,
    facial_expression: StreamHandler<FacialExpressionHandler>,
    speech_emotion: StreamHandler<SpeechEmotionHandler>,
    _mute_while_listening: Subscription,
    _resume_on_discard: Subscription,
}

impl SensorGraph {
    /// Wire all handlers onto the adapter-fed `audio` and `faces` sources.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::FusionError::Wiring`] if a source is already
    /// disposed or a worker thread cannot be started.
    pub fn wire(
        audio: &StreamSource<AudioChunk>,
        faces: &StreamSource<FaceObservation>,
        backends: SensorBackends,
        config: &FusionConfig,
    ) -> Result<Self> {
        let intent =
            SpeechIntentDetector::wire(faces, audio, config.intent.clone(), backends.vad)?;
        let segmenter = SpeechSegmenter::wire(audio, intent.output(), &config.speech)?;
        // Subscribed first so the microphone is paused before any answer to
        // this segment can resume it.
        let mute = pause_on(segmenter.output(), audio.control());
        let transcription = TranscriptionHandler::wire(segmenter.output(), backends.transcriber)?;
        let unmute = resume_on(transcription.handler().discarded(), audio.control());
        let facial_expression = FacialExpressionHandler::wire(
            "facial-expression",
            faces,
            backends.facial_expression,
        )?;
        let speech_emotion = EmotionHandler::new(backends.speech_emotion)
            .report_unclassified()
            .attach("speech-emotion", segmenter.output())?;

        info!("sensor graph wired");
        Ok(Self {
            audio: audio.clone(),
            intent,
            segmenter,
            transcription,
            facial_expression,
            speech_emotion,
            _mute_while_listening: mute,
            _resume_on_discard: unmute,
        })
    }

    /// Resume the microphone whenever `speech_ended` fires.
    pub fn resume_audio_on(&self, speech_ended: &StreamSource<()>) -> Subscription {
        resume_on(speech_ended, self.audio.control())
    }

    pub fn intents(&self) -> &StreamSource<SpeechIntent> {
        self.intent.output()
    }

    pub fn segments(&self) -> &StreamSource<SpeechSegment> {
        self.segmenter.output()
    }

    /// Transcribed utterances: the primary input of a cycle.
    pub fn questions(&self) -> &StreamSource<String> {
        self.transcription.output()
    }

    pub fn facial_expressions(&self) -> &StreamSource<EmotionScores> {
        self.facial_expression.output()
    }

    pub fn speech_emotions(&self) -> &StreamSource<EmotionScores> {
        self.speech_emotion.output()
    }

    /// Build an orchestrator over this graph with the emotion-aware prompt
    /// builder. With `cycle.await_speech_emotion` set, a cycle is held until
    /// the vocal emotion of the utterance has been classified.
    ///
    /// A failed cycle resumes the microphone, since no answer will be spoken.
    pub fn orchestrator(
        &self,
        transcript: &Transcript,
        agent: Arc<dyn ChatAgent>,
        sink: Arc<dyn OutputSink>,
        config: &FusionConfig,
    ) -> Result<FusionOrchestrator> {
        let prompt = EmotionPromptBuilder::new(config.emotion.threshold)
            .facial_expressions(self.facial_expressions())
            .speech_emotions(self.speech_emotions())
            .animations(AnimationCatalogue::from_config(&config.animations));

        let builder = FusionOrchestrator::builder(self.questions(), transcript, agent, sink)
            .auxiliary(self.facial_expressions())
            .auxiliary(self.speech_emotions())
            .prompt_builder(prompt)
            .config(config.cycle.clone());
        let builder = if config.cycle.await_speech_emotion {
            builder.completion(AwaitSource::new(self.speech_emotion.id()))
        } else {
            builder
        };
        let orchestrator = builder.build()?;
        // Standing until the orchestrator disposes its outcome stream.
        let _resume_on_failure = resume_when(
            orchestrator.outcomes(),
            self.audio.control(),
            |outcome: &CycleOutcome| outcome.is_failed(),
        );
        Ok(orchestrator)
    }

    /// Dispose every handler and, through them, the adapter sources.
    pub fn dispose(&self) {
        self.transcription.dispose();
        self.speech_emotion.dispose();
        self.facial_expression.dispose();
        self.segmenter.dispose();
        self.intent.dispose();
    }
}

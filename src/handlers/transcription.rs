//! Speech-to-text over captured utterances.

use crate::error::Result;
use crate::pipeline::messages::SpeechSegment;
use crate::stream::handler::{Handler, HandlerPolicy, StreamHandler};
use crate::stream::{Event, StreamSource};
use std::time::Instant;
use tracing::{debug, info};

/// External speech-to-text engine.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, segment: &SpeechSegment) -> anyhow::Result<String>;
}

/// Returns the same text for every segment. Used for dry runs without a
/// speech-to-text backend.
#[derive(Debug, Clone)]
pub struct FixedTranscriber {
    text: String,
}

impl FixedTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Transcriber for FixedTranscriber {
    fn transcribe(&self, _segment: &SpeechSegment) -> anyhow::Result<String> {
        Ok(self.text.clone())
    }
}

/// Emits the transcribed text of each segment, stamped with the segment's
/// (backdated) start time so the question sorts where it was spoken.
///
/// Segments that yield no text, blank or failed, are signalled on
/// [`TranscriptionHandler::discarded`] instead.
pub struct TranscriptionHandler {
    transcriber: Box<dyn Transcriber>,
    discarded: StreamSource<()>,
}

impl TranscriptionHandler {
    pub fn new(transcriber: Box<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            discarded: StreamSource::new("transcription-discarded"),
        }
    }

    /// Each segment is transcribed on its own thread. The discarded signal
    /// is disposed together with the handler.
    pub fn wire(
        segments: &StreamSource<SpeechSegment>,
        transcriber: Box<dyn Transcriber>,
    ) -> Result<StreamHandler<Self>> {
        let handler = StreamHandler::builder(
            "transcription",
            HandlerPolicy::Concurrent,
            Self::new(transcriber),
        )
        .upstream(segments, |segment| segment)
        .build()?;
        handler
            .output()
            .adopt(handler.handler().discarded.control());
        Ok(handler)
    }

    /// Fires once per segment that produced no question.
    pub fn discarded(&self) -> &StreamSource<()> {
        &self.discarded
    }
}

impl Handler for TranscriptionHandler {
    type Input = SpeechSegment;
    type Output = String;

    fn handle(&self, event: Event<SpeechSegment>, out: &StreamSource<String>) -> anyhow::Result<()> {
        let started = Instant::now();
        let text = match self.transcriber.transcribe(&event.value) {
            Ok(text) => text,
            Err(e) => {
                self.discarded.emit_at((), event.capture_time);
                return Err(e);
            }
        };
        let text = text.trim();
        if text.is_empty() {
            debug!(duration_secs = event.value.duration_secs, "empty transcription dropped");
            self.discarded.emit_at((), event.capture_time);
            return Ok(());
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = text.len(),
            "utterance transcribed"
        );
        out.emit_at(text.to_owned(), event.capture_time);
        Ok(())
    }
}

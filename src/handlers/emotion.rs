//! Emotion recognition over faces and utterances.
//!
//! Classification is slow relative to the frame rate, so these handlers
//! drop inputs that arrive while a classification is running instead of
//! queueing them.

use crate::error::Result;
use crate::pipeline::messages::{EmotionScores, FaceObservation, SpeechSegment};
use crate::stream::handler::{Handler, HandlerPolicy, StreamHandler};
use crate::stream::{Event, StreamSource};
use std::marker::PhantomData;
use tracing::trace;

/// External emotion classifier for inputs of type `I`.
pub trait EmotionClassifier<I>: Send + Sync {
    /// Scores per label. `None` means the input carried nothing to classify.
    fn classify(&self, input: &I) -> anyhow::Result<Option<EmotionScores>>;
}

/// Runs an [`EmotionClassifier`] per input and emits normalised scores.
pub struct EmotionHandler<I> {
    classifier: Box<dyn EmotionClassifier<I>>,
    report_unclassified: bool,
    _input: PhantomData<fn(I)>,
}

impl<I> EmotionHandler<I> {
    pub fn new(classifier: Box<dyn EmotionClassifier<I>>) -> Self {
        Self {
            classifier,
            report_unclassified: false,
            _input: PhantomData,
        }
    }

    /// Emit empty scores for every handled input that yields no
    /// classification, including classifier errors. A cycle waiting on this
    /// source is then released even when nothing was recognised.
    pub fn report_unclassified(mut self) -> Self {
        self.report_unclassified = true;
        self
    }

    fn unclassified(&self, event: &Event<I>, out: &StreamSource<EmotionScores>) {
        if self.report_unclassified {
            out.emit_at(EmotionScores::new(), event.capture_time);
        }
    }
}

impl<I: Clone + Send + 'static> EmotionHandler<I> {
    /// Wire a drop-if-busy emotion handler onto `source`.
    pub fn wire(
        name: &str,
        source: &StreamSource<I>,
        classifier: Box<dyn EmotionClassifier<I>>,
    ) -> Result<StreamHandler<Self>> {
        Self::new(classifier).attach(name, source)
    }

    /// Wire this handler, drop-if-busy, onto `source`.
    pub fn attach(self, name: &str, source: &StreamSource<I>) -> Result<StreamHandler<Self>> {
        StreamHandler::builder(name, HandlerPolicy::SerializedDropIfBusy, self)
            .upstream(source, |input| input)
            .build()
    }
}

impl<I: Send + 'static> Handler for EmotionHandler<I> {
    type Input = I;
    type Output = EmotionScores;

    fn handle(&self, event: Event<I>, out: &StreamSource<EmotionScores>) -> anyhow::Result<()> {
        let scores = match self.classifier.classify(&event.value) {
            Ok(Some(scores)) => scores.normalized(),
            Ok(None) => EmotionScores::new(),
            Err(e) => {
                self.unclassified(&event, out);
                return Err(e);
            }
        };
        if scores.is_empty() {
            self.unclassified(&event, out);
            return Ok(());
        }
        trace!(?scores, "emotion classified");
        out.emit_at(scores, event.capture_time);
        Ok(())
    }
}

/// Facial expression recognition over face observations.
pub type FacialExpressionHandler = EmotionHandler<FaceObservation>;

/// Vocal emotion recognition over captured utterances.
pub type SpeechEmotionHandler = EmotionHandler<SpeechSegment>;

/// Skips frames without a face and hands the face region to `classify`.
pub struct FaceRegionClassifier<F> {
    classify: F,
}

impl<F> FaceRegionClassifier<F>
where
    F: Fn(&[u8]) -> anyhow::Result<EmotionScores> + Send + Sync,
{
    pub fn new(classify: F) -> Self {
        Self { classify }
    }
}

impl<F> EmotionClassifier<FaceObservation> for FaceRegionClassifier<F>
where
    F: Fn(&[u8]) -> anyhow::Result<EmotionScores> + Send + Sync,
{
    fn classify(&self, input: &FaceObservation) -> anyhow::Result<Option<EmotionScores>> {
        match input {
            FaceObservation::NoFace => Ok(None),
            FaceObservation::Face { region, .. } => (self.classify)(region).map(Some),
        }
    }
}

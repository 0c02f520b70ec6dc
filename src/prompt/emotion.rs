//! Emotion-aware prompt builder.
//!
//! Averages the facial-expression and vocal-emotion scores collected during
//! a cycle and renders the confident ones as short sentences the agent can
//! react to.

use crate::agent::{AgentAnswer, Prompt};
use crate::error::Result;
use crate::pipeline::accumulator::CycleAccumulator;
use crate::pipeline::messages::EmotionScores;
use crate::prompt::{AnimationCatalogue, PromptBuilder, QUESTION_FIELD, require_question};
use crate::stream::{Event, StreamSource};
use std::collections::BTreeMap;
use tracing::debug;

pub const ANIMATIONS_FIELD: &str = "animations";
pub const FACIAL_EXPRESSIONS_FIELD: &str = "facial_expressions";
pub const SPEECH_EMOTIONS_FIELD: &str = "speech_emotions";

pub const NO_FACIAL_EXPRESSION: &str = "No emotion could be detected in the face.";
pub const NO_SPEECH_EMOTION: &str = "No emotion could be detected in the voice.";

/// (exclusive lower bound, confidence word), checked top to bottom.
const CONFIDENCE_WORDS: &[(f32, &str)] = &[
    (0.95, "certainly"),
    (0.85, "very likely"),
    (0.7, "likely"),
    (0.5, "possibly"),
];

/// Word describing how sure the classifier was about a score.
pub fn confidence_word(score: f32) -> &'static str {
    CONFIDENCE_WORDS
        .iter()
        .find(|(bound, _)| score > *bound)
        .map_or("unlikely", |(_, word)| *word)
}

/// Per-label mean over all events. A label missing from some events counts
/// as zero for those events.
pub fn average_scores(events: &[Event<EmotionScores>]) -> Option<EmotionScores> {
    if events.is_empty() {
        return None;
    }
    let mut sums: BTreeMap<String, f32> = BTreeMap::new();
    for event in events {
        for (label, score) in event.value.iter() {
            *sums.entry(label.to_owned()).or_insert(0.0) += score;
        }
    }
    let n = events.len() as f32;
    Some(sums.into_iter().map(|(label, sum)| (label, sum / n)).collect())
}

#[derive(Debug, Clone)]
pub struct EmotionPromptBuilder {
    threshold: f32,
    facial: Option<StreamSource<EmotionScores>>,
    speech: Option<StreamSource<EmotionScores>>,
    animations: AnimationCatalogue,
}

impl EmotionPromptBuilder {
    /// Scores at or below `threshold` are left out.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            facial: None,
            speech: None,
            animations: AnimationCatalogue::default(),
        }
    }

    pub fn facial_expressions(mut self, source: &StreamSource<EmotionScores>) -> Self {
        self.facial = Some(source.clone());
        self
    }

    pub fn speech_emotions(mut self, source: &StreamSource<EmotionScores>) -> Self {
        self.speech = Some(source.clone());
        self
    }

    pub fn animations(mut self, catalogue: AnimationCatalogue) -> Self {
        self.animations = catalogue;
        self
    }

    fn describe(
        &self,
        cycle: &CycleAccumulator,
        source: Option<&StreamSource<EmotionScores>>,
        phrase: fn(&str, &str) -> String,
    ) -> Option<String> {
        let events = cycle.get(source?);
        let averaged = average_scores(&events)?;
        let sentences: Vec<String> = averaged
            .iter()
            .filter(|(_, score)| *score > self.threshold)
            .map(|(label, score)| phrase(confidence_word(score), label))
            .collect();
        if sentences.is_empty() {
            None
        } else {
            Some(sentences.join(" "))
        }
    }
}

fn looks(confidence: &str, label: &str) -> String {
    format!("Looks ({confidence}) {label}.")
}

fn sounds(confidence: &str, label: &str) -> String {
    format!("Sounds ({confidence}) {label}.")
}

impl PromptBuilder for EmotionPromptBuilder {
    fn create_prompt(&self, cycle: &CycleAccumulator) -> Result<Prompt> {
        let question = require_question(cycle)?;
        let facial = self
            .describe(cycle, self.facial.as_ref(), looks)
            .unwrap_or_else(|| NO_FACIAL_EXPRESSION.to_owned());
        let speech = self
            .describe(cycle, self.speech.as_ref(), sounds)
            .unwrap_or_else(|| NO_SPEECH_EMOTION.to_owned());

        debug!(cycle = cycle.cycle(), %question, %facial, %speech, "prompt assembled");

        Ok(Prompt::new()
            .with(QUESTION_FIELD, question)
            .with(ANIMATIONS_FIELD, self.animations.prompt_list())
            .with(FACIAL_EXPRESSIONS_FIELD, facial)
            .with(SPEECH_EMOTIONS_FIELD, speech))
    }

    fn transform_answer(&self, mut answer: AgentAnswer) -> AgentAnswer {
        answer.answer = self.animations.resolve(&answer.answer);
        answer
    }
}

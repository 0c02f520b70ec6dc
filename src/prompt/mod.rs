//! Prompt building: turning a closed cycle into agent input.
//!
//! A [`PromptBuilder`] sees the accumulator after it has been swapped out of
//! the orchestrator, so nothing it reads can change underneath it.

pub mod animation;
pub mod emotion;

use crate::agent::{AgentAnswer, Prompt};
use crate::error::{FusionError, Result};
use crate::pipeline::accumulator::CycleAccumulator;

pub use animation::AnimationCatalogue;
pub use emotion::EmotionPromptBuilder;

/// Prompt field holding the question text.
pub const QUESTION_FIELD: &str = "question";

/// Domain step between a closed cycle and the agent.
pub trait PromptBuilder: Send + Sync {
    /// Build the agent request from a closed cycle.
    fn create_prompt(&self, cycle: &CycleAccumulator) -> Result<Prompt>;

    /// Post-process the agent's answer before it is handed to the output
    /// sink. The transcript always shows the untransformed display text.
    fn transform_answer(&self, answer: AgentAnswer) -> AgentAnswer {
        answer
    }
}

/// Extract the question text, failing when the cycle has none.
pub fn require_question(cycle: &CycleAccumulator) -> Result<&str> {
    cycle
        .question()
        .map(|q| q.value.as_str())
        .ok_or_else(|| FusionError::Prompt(format!("cycle {} has no question", cycle.cycle())))
}

/// Builder that forwards only the question.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionPrompt;

impl PromptBuilder for QuestionPrompt {
    fn create_prompt(&self, cycle: &CycleAccumulator) -> Result<Prompt> {
        Ok(Prompt::new().with(QUESTION_FIELD, require_question(cycle)?))
    }
}

//! Offline agent that always returns the same answer.

use crate::agent::{AgentAnswer, ChatAgent, Prompt};

/// Reply used when running without API access.
pub const DEFAULT_CANNED_ANSWER: &str = "This is where the answer to your question would be, \
but I am not finished yet. Come back later. Here is a joke instead: why did the math book \
look sad? Because it had too many problems.";

/// Agent for dry runs: no network, no cost.
#[derive(Debug, Clone)]
pub struct CannedAgent {
    answer: String,
}

impl CannedAgent {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

impl Default for CannedAgent {
    fn default() -> Self {
        Self::new(DEFAULT_CANNED_ANSWER)
    }
}

impl ChatAgent for CannedAgent {
    fn prompt(&self, prompt: &Prompt) -> anyhow::Result<AgentAnswer> {
        tracing::debug!(fields = prompt.len(), "canned agent answering");
        Ok(AgentAnswer::new(self.answer.clone()))
    }
}

//! Output sinks: where answers go after the transcript (robot actuation,
//! speech playback).

use crate::agent::AgentAnswer;
use crate::stream::StreamSource;
use tracing::info;

/// Delivers an answer to the outside world. Failures are reported to the
/// caller, which logs them; they never re-trigger the agent.
pub trait OutputSink: Send + Sync {
    fn deliver(&self, answer: &AgentAnswer) -> anyhow::Result<()>;
}

/// Sink for running without a robot: logs the answer and immediately
/// signals that "speaking" has finished.
pub struct ConsoleSink {
    speech_ended: StreamSource<()>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            speech_ended: StreamSource::new("speech-ended"),
        }
    }

    /// Fires once per delivered answer, after playback is done.
    pub fn speech_ended(&self) -> &StreamSource<()> {
        &self.speech_ended
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for ConsoleSink {
    fn deliver(&self, answer: &AgentAnswer) -> anyhow::Result<()> {
        info!(answer = %answer.answer, "answer delivered");
        self.speech_ended.emit(());
        Ok(())
    }
}

/// Sink that discards answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn deliver(&self, _answer: &AgentAnswer) -> anyhow::Result<()> {
        Ok(())
    }
}

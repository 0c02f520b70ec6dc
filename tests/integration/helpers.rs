//! Shared helpers for integration tests.

use consens::agent::{AgentAnswer, ChatAgent, Prompt};
use consens::sink::OutputSink;
use consens::stream::{Event, StreamSource};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Agent that records every prompt and answers `"answer to <question>"`.
#[derive(Default)]
pub(crate) struct RecordingAgent {
    prompts: Mutex<Vec<Prompt>>,
}

impl RecordingAgent {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn questions(&self) -> Vec<String> {
        self.prompts()
            .iter()
            .map(|p| p.get("question").unwrap_or_default().to_owned())
            .collect()
    }
}

impl ChatAgent for RecordingAgent {
    fn prompt(&self, prompt: &Prompt) -> anyhow::Result<AgentAnswer> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let question = prompt.get("question").unwrap_or_default();
        Ok(AgentAnswer::new(format!("answer to {question}")))
    }
}

/// Agent that always fails.
pub(crate) struct FailingAgent;

impl ChatAgent for FailingAgent {
    fn prompt(&self, _prompt: &Prompt) -> anyhow::Result<AgentAnswer> {
        anyhow::bail!("upstream unavailable")
    }
}

/// Sink that records every delivered answer.
#[derive(Default)]
pub(crate) struct RecordingSink {
    answers: Mutex<Vec<AgentAnswer>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn answers(&self) -> Vec<AgentAnswer> {
        self.answers.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn deliver(&self, answer: &AgentAnswer) -> anyhow::Result<()> {
        self.answers.lock().unwrap().push(answer.clone());
        Ok(())
    }
}

/// Collect every value `source` emits from now on.
pub(crate) fn collect<T: Clone + Send + 'static>(source: &StreamSource<T>) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    source.subscribe(move |event: &Event<T>| sink.lock().unwrap().push(event.value.clone()));
    seen
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

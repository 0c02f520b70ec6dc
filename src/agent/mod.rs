//! Chat agent seam: structured prompt in, structured answer out.
//!
//! The orchestrator calls [`ChatAgent::prompt`] synchronously on its dispatch
//! path. Implementations may block on network I/O; they must not retry on
//! their own behalf unless that is their documented policy.

pub mod canned;
pub mod http_provider;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use canned::CannedAgent;
pub use http_provider::OpenAiChatAgent;

/// Answer shown when the agent returned no usable text.
pub const FALLBACK_ANSWER: &str = "There was a problem with the answer!";

/// Named text fields assembled by a prompt builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prompt(BTreeMap<String, String>);

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace `{field}` placeholders in `template` with prompt values.
    /// Unknown placeholders are left untouched.
    pub fn render(&self, template: &str) -> String {
        let mut rendered = template.to_owned();
        for (field, value) in &self.0 {
            rendered = rendered.replace(&format!("{{{field}}}"), value);
        }
        rendered
    }
}

/// Structured answer from a chat agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAnswer {
    /// Full answer, possibly with embedded control directives.
    pub answer: String,
    /// Display-safe answer with control directives stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_answer: Option<String>,
}

impl AgentAnswer {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            clean_answer: None,
        }
    }

    /// Text for the transcript: the clean answer when present, else the raw
    /// answer, else [`FALLBACK_ANSWER`].
    pub fn display_text(&self) -> &str {
        match self.clean_answer.as_deref() {
            Some(clean) if !clean.trim().is_empty() => clean,
            _ if !self.answer.trim().is_empty() => &self.answer,
            _ => FALLBACK_ANSWER,
        }
    }
}

/// External language-model client.
pub trait ChatAgent: Send + Sync {
    /// Answer one closed conversation cycle.
    fn prompt(&self, prompt: &Prompt) -> anyhow::Result<AgentAnswer>;
}

/// Remove `^name(args)` control directives and collapse the whitespace they
/// leave behind.
pub fn strip_directives(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(caret) = rest.find('^') {
        out.push_str(&rest[..caret]);
        let tail = &rest[caret..];
        match directive_len(tail) {
            Some(len) => rest = &tail[len..],
            None => {
                out.push('^');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte length of a directive at the start of `s` (which begins with `^`).
fn directive_len(s: &str) -> Option<usize> {
    let line_end = s.find('\n').unwrap_or(s.len());
    let line = &s[..line_end];
    let open = line.find('(')?;
    let close = line[open..].find(')')? + open;
    Some(close + 1)
}

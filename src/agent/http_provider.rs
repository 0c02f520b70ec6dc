//! OpenAI-compatible chat agent.
//!
//! Renders the system prompt from the prompt fields, sends the question as
//! the user turn together with recent history, and splits the reply into the
//! raw answer (for actuation) and a directive-free answer (for display).

use crate::agent::{AgentAnswer, ChatAgent, Prompt, strip_directives};
use crate::config::AgentConfig;
use crate::error::{FusionError, Result};
use crate::prompt::QUESTION_FIELD;
use crate::stream::lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Chat agent speaking the `/chat/completions` API of any OpenAI-compatible
/// server.
pub struct OpenAiChatAgent {
    base_url: String,
    api_key: String,
    model_id: String,
    system_prompt: String,
    max_history_turns: usize,
    history: Mutex<VecDeque<(String, String)>>,
    agent: ureq::Agent,
}

impl OpenAiChatAgent {
    /// Create an agent.
    ///
    /// - `base_url`: The base URL including `/v1` (e.g. `https://api.openai.com/v1`).
    /// - `api_key`: Bearer token; empty for unauthenticated local servers.
    /// - `model_id`: The model identifier to send in requests.
    pub fn new(base_url: String, api_key: String, model_id: String) -> Self {
        Self {
            base_url,
            api_key,
            model_id,
            system_prompt: crate::config::DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_history_turns: 10,
            history: Mutex::new(VecDeque::new()),
            agent: ureq::agent(),
        }
    }

    /// Build from configuration, reading the API key from the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Config`] when the base URL or model is empty.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() || config.api_model.trim().is_empty() {
            return Err(FusionError::Config(
                "agent.api_url and agent.api_model must be set".to_owned(),
            ));
        }
        let api_key = if config.api_key_env.is_empty() {
            String::new()
        } else {
            std::env::var(&config.api_key_env).unwrap_or_else(|_| {
                tracing::warn!(var = %config.api_key_env, "API key variable not set; sending unauthenticated requests");
                String::new()
            })
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build();
        Ok(Self {
            base_url: config.api_url.clone(),
            api_key,
            model_id: config.api_model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_history_turns: config.max_history_turns,
            history: Mutex::new(VecDeque::new()),
            agent,
        })
    }

    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_prompt = template.into();
        self
    }

    /// Build the OpenAI-compatible JSON request body.
    fn build_body(&self, prompt: &Prompt) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": prompt.render(&self.system_prompt),
        })];

        for (question, answer) in lock(&self.history).iter() {
            messages.push(serde_json::json!({ "role": "user", "content": question }));
            messages.push(serde_json::json!({ "role": "assistant", "content": answer }));
        }

        messages.push(serde_json::json!({
            "role": "user",
            "content": prompt.get(QUESTION_FIELD).unwrap_or_default(),
        }));

        serde_json::json!({
            "model": self.model_id,
            "messages": messages,
            "stream": false,
        })
    }

    fn remember(&self, question: &str, answer: &str) {
        if self.max_history_turns == 0 {
            return;
        }
        let mut history = lock(&self.history);
        while history.len() >= self.max_history_turns {
            history.pop_front();
        }
        history.push_back((question.to_owned(), answer.to_owned()));
    }
}

impl ChatAgent for OpenAiChatAgent {
    fn prompt(&self, prompt: &Prompt) -> anyhow::Result<AgentAnswer> {
        let body = serde_json::to_string(&self.build_body(prompt))?;
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/chat/completions");

        let mut req = self.agent.post(&url).set("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            let auth = format!("Bearer {}", self.api_key);
            req = req.set("Authorization", &auth);
        }

        let response = req
            .send_string(&body)
            .map_err(|e| FusionError::Agent(format!("HTTP request failed: {e}")))?;
        let text = response
            .into_string()
            .map_err(|e| FusionError::Agent(format!("read error: {e}")))?;
        let reply: serde_json::Value = serde_json::from_str(&text)?;
        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| FusionError::Agent("response has no message content".to_owned()))?;

        let answer = AgentAnswer {
            answer: content.replace('\n', " "),
            clean_answer: Some(strip_directives(content)),
        };
        self.remember(prompt.get(QUESTION_FIELD).unwrap_or_default(), &answer.answer);
        Ok(answer)
    }
}

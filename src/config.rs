//! Configuration types for the fusion engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Cycle dispatch and transcript attribution.
    pub cycle: CycleConfig,
    /// Emotion summarisation for prompts.
    pub emotion: EmotionConfig,
    /// Speech segmentation of the audio stream.
    pub speech: SpeechConfig,
    /// Speech-intent detection from face and voice-activity signals.
    pub intent: IntentConfig,
    /// External chat agent.
    pub agent: AgentConfig,
    /// Transcript history.
    pub transcript: TranscriptConfig,
    /// Robot animations the agent may reference in its answers.
    pub animations: Vec<AnimationConfig>,
}

/// Cycle dispatch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Sender name for agent answers and failure notices.
    pub system_sender: String,
    /// Sender name for natively captured user input echoed to the transcript.
    pub user_sender: String,
    /// Generic message posted when the agent call fails.
    pub failure_message: String,
    /// Hold dispatch until the vocal-emotion signal for the cycle arrived.
    pub await_speech_emotion: bool,
    /// Echo natively captured questions to the transcript.
    pub echo_primary_to_transcript: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            system_sender: "assistant".to_owned(),
            user_sender: "You".to_owned(),
            failure_message: "Sorry, something went wrong while answering. Please try again."
                .to_owned(),
            await_speech_emotion: false,
            echo_primary_to_transcript: true,
        }
    }
}

/// Emotion summarisation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Averaged scores at or below this value are left out of the prompt.
    pub threshold: f32,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

/// Speech segmentation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per audio chunk delivered by the microphone adapter.
    pub chunk_size: usize,
    /// Segments shorter than this are discarded.
    pub min_speech_duration_secs: f64,
    /// Audio kept before speech onset and prepended to each segment.
    pub sliding_window_secs: f64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_size: 1024,
            min_speech_duration_secs: 2.3,
            sliding_window_secs: 2.0,
        }
    }
}

impl SpeechConfig {
    /// Number of chunks that fit in the pre-roll window (at least one).
    pub fn sliding_window_chunks(&self) -> usize {
        if self.chunk_size == 0 {
            return 1;
        }
        let chunks_per_sec = f64::from(self.sample_rate) / self.chunk_size as f64;
        ((chunks_per_sec * self.sliding_window_secs).round() as usize).max(1)
    }
}

/// Speech-intent detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Mouth-angle fluctuation above which the mouth counts as moving.
    pub mouth_fluctuation_threshold: f32,
    /// Gaze angle (radians) below which the person counts as looking at
    /// the robot.
    pub gaze_angle_threshold: f32,
    /// Fraction of positive samples in a window for a flag to turn on.
    pub probability_threshold: f32,
    /// Window length while the person is not speaking.
    pub start_window: usize,
    /// Window length while the person is speaking.
    pub end_window: usize,
    /// Length of one voice-activity frame in milliseconds.
    pub vad_frame_ms: u32,
    /// RMS energy above which a frame counts as voiced.
    pub vad_energy_threshold: f32,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            mouth_fluctuation_threshold: 0.005,
            gaze_angle_threshold: 0.7,
            probability_threshold: 0.75,
            start_window: 20,
            end_window: 20,
            vad_frame_ms: 30,
            vad_energy_threshold: 0.01,
        }
    }
}

/// External chat agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of an OpenAI-compatible API, including `/v1`.
    pub api_url: String,
    /// Model identifier sent with each request.
    pub api_model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Request timeout.
    pub timeout_secs: u64,
    /// Number of previous question/answer pairs sent as chat history.
    pub max_history_turns: usize,
    /// System prompt template. `{field}` placeholders are filled from the
    /// prompt fields.
    pub system_prompt: String,
    /// Answer with a canned reply instead of calling the API.
    pub mock: bool,
}

/// Default system prompt for the emotion-aware service robot.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a service robot with emotional awareness. You answer visitors' \
questions and respond to their emotions when needed. Keep answers short.
If the emotions of the person do not match what they say, address that explicitly.
-----------
Animations (animation: labels):
{animations}
-----------
Emotions read from the person's face:
{facial_expressions}
-----------
Emotions read from the person's voice:
{speech_emotions}
-----------
Weave animations into your answer using ^start(animation), ^run(animation), \
^stop(animation) or ^wait(animation). Phrase everything else as spoken dialogue.";

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_model: "gpt-4o".to_owned(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
            timeout_secs: 60,
            max_history_turns: 10,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            mock: false,
        }
    }
}

/// Transcript configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Messages retained for late-joining chat clients.
    pub history_capacity: usize,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            history_capacity: crate::transcript::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// A robot animation the agent may trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationConfig {
    /// Short name the agent uses in its answer.
    pub name: String,
    /// Path understood by the robot.
    pub path: String,
    /// Comma-separated descriptive labels shown to the agent.
    #[serde(default)]
    pub labels: String,
}

impl FusionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::FusionError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::FusionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `dirs::config_dir()/consens/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("consens"))
            .unwrap_or_else(|| PathBuf::from("/tmp/consens-config"))
            .join("config.toml")
    }
}

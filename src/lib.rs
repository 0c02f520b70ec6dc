//! Consens: multimodal stream fusion for emotion-aware conversational agents.
//!
//! Sensor streams (microphone, camera) are turned into typed event streams
//! by chains of handlers. A fusion orchestrator merges a primary question
//! stream with up to three auxiliary context streams into cycles and
//! dispatches each completed cycle to a chat agent:
//!
//! ```text
//!  audio ─▶ intent ─▶ segmenter ─▶ transcription ─┐ question
//!  faces ─▶ facial expression ────────────────────┤ context
//!           segmenter ─▶ speech emotion ──────────┤ context
//!  chat  ─▶ transcript ───────────────────────────┘ question
//!                                                  ▼
//!                       orchestrator ─▶ prompt builder ─▶ agent
//!                                                  ▼
//!                                   transcript + output sink
//! ```
//!
//! The fusion core runs on plain threads; only the host bridge binary uses
//! an async runtime.

pub mod agent;
pub mod config;
pub mod error;
pub mod handlers;
pub mod host;
pub mod pipeline;
pub mod prompt;
pub mod sink;
pub mod stream;
pub mod transcript;

pub use agent::{AgentAnswer, ChatAgent, Prompt};
pub use config::FusionConfig;
pub use error::{FusionError, Result};
pub use pipeline::coordinator::{CycleOutcome, CycleState, FusionOrchestrator};
pub use stream::handler::{Handler, HandlerPolicy, StreamHandler};
pub use stream::{Event, SourceId, StreamSource, Subscription};
pub use transcript::{Message, Transcript};

//! Error types for the consens fusion engine.

/// Top-level error type for stream fusion and cycle dispatch.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid wiring between sources, handlers and the orchestrator.
    #[error("wiring error: {0}")]
    Wiring(String),

    /// Prompt construction failed for a closed cycle.
    #[error("prompt error: {0}")]
    Prompt(String),

    /// The external chat agent failed to answer.
    #[error("agent error: {0}")]
    Agent(String),

    /// The output sink rejected an answer.
    #[error("sink error: {0}")]
    Sink(String),

    /// Transcript bridge error.
    #[error("transcript error: {0}")]
    Transcript(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, FusionError>;

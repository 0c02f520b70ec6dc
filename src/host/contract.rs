//! Line formats exchanged with the host shell.

use crate::transcript::Message;
use serde::{Deserialize, Serialize};

/// A chat line typed by the user in the host shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInput {
    pub text: String,
    /// Display name; the configured user sender when absent.
    #[serde(default)]
    pub sender: Option<String>,
}

/// A line written back to the host shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// A transcript message, flattened next to the tag.
    Message(Message),
    /// An input line could not be understood.
    Error { message: String },
}

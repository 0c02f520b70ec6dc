//! Host integration: the transcript bridged to a native shell over
//! newline-delimited JSON.

pub mod contract;
pub mod stdio;

pub use contract::{ChatInput, Outbound};
pub use stdio::{StdioBridge, run_bridge};

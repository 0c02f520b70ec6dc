//! Integration test binary: all integration tests consolidated into a single
//! binary to keep link times down.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod chat_feedback;
mod fusion_cycles;
mod openai_agent;
mod sensor_graph;

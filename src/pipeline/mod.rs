//! Cycle fusion: accumulation, completion, dispatch and sensor wiring.

pub mod accumulator;
pub mod backpressure;
pub mod completion;
pub mod coordinator;
pub mod messages;
pub mod sensors;

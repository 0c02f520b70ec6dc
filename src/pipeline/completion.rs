//! Cycle-completion predicates.
//!
//! The orchestrator evaluates the predicate synchronously after every event,
//! inside its critical section, so implementations must be cheap and must
//! not block.

use crate::pipeline::accumulator::CycleAccumulator;
use crate::stream::SourceId;

/// Decides whether the current cycle is ready to be dispatched.
pub trait CompletionPredicate: Send + Sync {
    fn is_complete(&self, cycle: &CycleAccumulator) -> bool;
}

impl<F> CompletionPredicate for F
where
    F: Fn(&CycleAccumulator) -> bool + Send + Sync,
{
    fn is_complete(&self, cycle: &CycleAccumulator) -> bool {
        self(cycle)
    }
}

/// Complete as soon as a question is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionOnly;

impl CompletionPredicate for QuestionOnly {
    fn is_complete(&self, cycle: &CycleAccumulator) -> bool {
        cycle.question().is_some()
    }
}

/// Complete once a question is present and the designated final source
/// (typically the slowest derived signal, e.g. vocal emotion) has delivered
/// at least one event.
#[derive(Debug, Clone, Copy)]
pub struct AwaitSource {
    source: SourceId,
}

impl AwaitSource {
    pub fn new(source: SourceId) -> Self {
        Self { source }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }
}

impl CompletionPredicate for AwaitSource {
    fn is_complete(&self, cycle: &CycleAccumulator) -> bool {
        cycle.question().is_some() && cycle.has(self.source)
    }
}

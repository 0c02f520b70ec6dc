//! Per-cycle record of the question and the auxiliary events around it.
//!
//! Buffers keep arrival order per source. Nothing here orders events across
//! sources; prompt builders that care compare `capture_time` explicitly.

use crate::stream::{Event, SourceId, StreamSource};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased auxiliary value, shared rather than copied between cycles.
pub type AuxValue = Arc<dyn Any + Send + Sync>;

/// An auxiliary event as stored in the accumulator.
pub type AuxEvent = Event<AuxValue>;

/// Erase the value type of an event so it can be buffered next to events
/// from differently typed sources.
pub fn erase<T: Send + Sync + 'static>(event: Event<T>) -> AuxEvent {
    event.map(|value| Arc::new(value) as AuxValue)
}

/// Mutable buffer for one in-flight conversation cycle.
pub struct CycleAccumulator {
    cycle: u64,
    opened_at: DateTime<Utc>,
    question: Option<Event<String>>,
    buffers: HashMap<SourceId, Vec<AuxEvent>>,
}

impl CycleAccumulator {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            opened_at: Utc::now(),
            question: None,
            buffers: HashMap::new(),
        }
    }

    /// Sequence number of the cycle this accumulator records.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Record the primary-input event that opens the cycle.
    ///
    /// A second question before dispatch replaces the first; the replaced
    /// question is returned so the caller can report it. Auxiliary buffers
    /// are kept as they are.
    pub fn set_question(&mut self, event: Event<String>) -> Option<Event<String>> {
        self.question.replace(event)
    }

    pub fn question(&self) -> Option<&Event<String>> {
        self.question.as_ref()
    }

    /// Append an auxiliary event to the buffer of its source.
    pub fn add(&mut self, event: AuxEvent) {
        self.buffers.entry(event.source).or_default().push(event);
    }

    /// Whether at least one event from `source` was buffered this cycle.
    pub fn has(&self, source: SourceId) -> bool {
        self.buffers.get(&source).is_some_and(|b| !b.is_empty())
    }

    /// All buffered events of `source`, in arrival order.
    pub fn events(&self, source: SourceId) -> &[AuxEvent] {
        self.buffers.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Typed view of the events buffered for `source`, in arrival order.
    /// Empty if the source delivered nothing this cycle.
    pub fn get<T>(&self, source: &StreamSource<T>) -> Vec<Event<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.events(source.id())
            .iter()
            .filter_map(|e| {
                e.value
                    .downcast_ref::<T>()
                    .map(|v| Event::new(e.source, v.clone(), e.capture_time))
            })
            .collect()
    }

    /// Like [`get`](Self::get), restricted to events captured strictly after
    /// the question. Returns everything when no question is set.
    pub fn get_since_question<T>(&self, source: &StreamSource<T>) -> Vec<Event<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let events = self.get(source);
        match &self.question {
            Some(q) => events
                .into_iter()
                .filter(|e| e.capture_time > q.capture_time)
                .collect(),
            None => events,
        }
    }

    /// Sources that delivered at least one event this cycle.
    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(id, _)| *id)
    }

    /// Total number of buffered auxiliary events.
    pub fn len(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }

    /// True when neither a question nor any auxiliary event was recorded.
    pub fn is_empty(&self) -> bool {
        self.question.is_none() && self.len() == 0
    }
}

impl fmt::Debug for CycleAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<SourceId, usize> =
            self.buffers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("CycleAccumulator")
            .field("cycle", &self.cycle)
            .field("question", &self.question.as_ref().map(|q| &q.value))
            .field("buffers", &counts)
            .finish()
    }
}

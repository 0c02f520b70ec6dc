//! Fusion orchestrator: owns the cycle accumulator and the dispatch state
//! machine.
//!
//! Every primary and auxiliary event funnels through one entry point. The
//! accumulator mutation, predicate evaluation and accumulator swap run under
//! a single lock; the agent call runs outside it on the thread that closed
//! the cycle, so producers never wait on the network.
//!
//! ```text
//!  primary ──┐                          ┌─▶ prompt builder ─▶ agent
//!  chat ─────┼─▶ ingest ─▶ accumulator ─┤                        │
//!  aux 0..3 ─┘     (lock)   (swap)      └─ transcript ◀──────────┤
//!                                          output sink ◀─────────┘
//! ```

use crate::agent::{AgentAnswer, ChatAgent};
use crate::config::CycleConfig;
use crate::error::{FusionError, Result};
use crate::pipeline::accumulator::{AuxEvent, CycleAccumulator, erase};
use crate::pipeline::completion::{CompletionPredicate, QuestionOnly};
use crate::prompt::{PromptBuilder, QuestionPrompt};
use crate::sink::OutputSink;
use crate::stream::{Event, SourceControl, SourceId, StreamSource, Subscription, lock};
use crate::transcript::{Message, Transcript};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};

/// Maximum number of auxiliary sources an orchestrator merges.
pub const MAX_AUXILIARY: usize = 3;

/// Orchestrator state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Collecting events into the current cycle.
    Accumulating,
    /// A closed cycle is with the agent or the output sink.
    Dispatching,
}

/// How a dispatched cycle ended. Published on
/// [`FusionOrchestrator::outcomes`] after the cycle leaves the dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The answer reached the transcript and the output sink.
    Delivered { cycle: u64 },
    /// Prompt building, the agent call or the output sink failed.
    Failed { cycle: u64 },
}

impl CycleOutcome {
    pub fn cycle(self) -> u64 {
        match self {
            Self::Delivered { cycle } | Self::Failed { cycle } => cycle,
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

enum Arrival {
    Question(Event<String>),
    Auxiliary(AuxEvent),
}

struct CycleSlot {
    accumulator: CycleAccumulator,
    dispatching: bool,
}

struct Core {
    primary: SourceId,
    slot: Mutex<CycleSlot>,
    completion: Box<dyn CompletionPredicate>,
    prompt_builder: Box<dyn PromptBuilder>,
    agent: Arc<dyn ChatAgent>,
    sink: Arc<dyn OutputSink>,
    transcript: Transcript,
    outcomes: StreamSource<CycleOutcome>,
    config: CycleConfig,
    disposed: AtomicBool,
}

impl Core {
    fn ingest(&self, arrival: Arrival) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let closed = {
            let mut slot = lock(&self.slot);
            match arrival {
                Arrival::Question(event) => {
                    let cycle = slot.accumulator.cycle();
                    if let Some(replaced) = slot.accumulator.set_question(event) {
                        warn!(
                            cycle,
                            replaced = %replaced.value,
                            "question replaced before dispatch; buffered auxiliary events now count towards the new question"
                        );
                    }
                }
                Arrival::Auxiliary(event) => slot.accumulator.add(event),
            }
            self.close_if_complete(&mut slot)
        };
        if let Some(closed) = closed {
            self.drain(closed);
        }
    }

    /// Swap in a fresh accumulator if the current one is complete and no
    /// other cycle is in flight. Must be called with the slot locked.
    fn close_if_complete(&self, slot: &mut CycleSlot) -> Option<CycleAccumulator> {
        if slot.dispatching || !self.completion.is_complete(&slot.accumulator) {
            return None;
        }
        let next = CycleAccumulator::new(slot.accumulator.cycle() + 1);
        slot.dispatching = true;
        Some(std::mem::replace(&mut slot.accumulator, next))
    }

    /// Dispatch `closed`, then keep dispatching cycles that completed while
    /// it was in flight.
    fn drain(&self, mut closed: CycleAccumulator) {
        loop {
            let cycle = closed.cycle();
            let delivered = catch_unwind(AssertUnwindSafe(|| self.dispatch(&closed)))
                .unwrap_or_else(|_| {
                    error!(cycle, "dispatch panicked");
                    self.post_failure();
                    false
                });
            self.outcomes.emit(if delivered {
                CycleOutcome::Delivered { cycle }
            } else {
                CycleOutcome::Failed { cycle }
            });
            let next = {
                let mut slot = lock(&self.slot);
                slot.dispatching = false;
                if self.disposed.load(Ordering::Acquire) {
                    None
                } else {
                    self.close_if_complete(&mut slot)
                }
            };
            match next {
                Some(accumulator) => {
                    debug!(cycle = accumulator.cycle(), "dispatching deferred cycle");
                    closed = accumulator;
                }
                None => break,
            }
        }
    }

    /// Returns whether the answer reached the output sink.
    fn dispatch(&self, closed: &CycleAccumulator) -> bool {
        let cycle = closed.cycle();
        info!(cycle, events = closed.len(), "cycle closed");

        let prompt = match self.prompt_builder.create_prompt(closed) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!(cycle, error = %e, "prompt building failed");
                self.post_failure();
                return false;
            }
        };

        let answer = match self.agent.prompt(&prompt) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(cycle, error = %e, "agent call failed");
                self.post_failure();
                return false;
            }
        };

        self.transcript
            .post(answer.display_text(), self.config.system_sender.as_str(), false);

        let answer: AgentAnswer = self.prompt_builder.transform_answer(answer);
        if let Err(e) = self.sink.deliver(&answer) {
            error!(cycle, error = %e, "output sink failed");
            return false;
        }
        debug!(cycle, "cycle dispatched");
        true
    }

    fn post_failure(&self) {
        self.transcript.post(
            self.config.failure_message.as_str(),
            self.config.system_sender.as_str(),
            false,
        );
    }
}

type AttachAux = Box<dyn FnOnce(Weak<Core>) -> Subscription + Send>;

struct AuxWiring {
    control: Arc<dyn SourceControl>,
    attach: AttachAux,
}

/// Builder for a [`FusionOrchestrator`].
pub struct FusionOrchestratorBuilder {
    primary: StreamSource<String>,
    transcript: Transcript,
    agent: Arc<dyn ChatAgent>,
    sink: Arc<dyn OutputSink>,
    auxiliary: Vec<AuxWiring>,
    completion: Box<dyn CompletionPredicate>,
    prompt_builder: Box<dyn PromptBuilder>,
    config: CycleConfig,
}

impl FusionOrchestratorBuilder {
    /// Merge `source` into every cycle as auxiliary context.
    pub fn auxiliary<T>(mut self, source: &StreamSource<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let upstream = source.clone();
        self.auxiliary.push(AuxWiring {
            control: source.control(),
            attach: Box::new(move |core: Weak<Core>| {
                upstream.subscribe(move |event: &Event<T>| {
                    if let Some(core) = core.upgrade() {
                        core.ingest(Arrival::Auxiliary(erase(event.clone())));
                    }
                })
            }),
        });
        self
    }

    /// Replace the default "question present" completion predicate.
    pub fn completion(mut self, predicate: impl CompletionPredicate + 'static) -> Self {
        self.completion = Box::new(predicate);
        self
    }

    /// Replace the default question-only prompt builder.
    pub fn prompt_builder(mut self, builder: impl PromptBuilder + 'static) -> Self {
        self.prompt_builder = Box::new(builder);
        self
    }

    pub fn config(mut self, config: CycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to all inputs and start accumulating.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Wiring`] when more than [`MAX_AUXILIARY`]
    /// auxiliary sources were given, when the primary source is also listed
    /// as auxiliary, or when any input is already disposed.
    pub fn build(self) -> Result<FusionOrchestrator> {
        if self.auxiliary.len() > MAX_AUXILIARY {
            return Err(FusionError::Wiring(format!(
                "orchestrator accepts at most {MAX_AUXILIARY} auxiliary sources, got {}",
                self.auxiliary.len()
            )));
        }
        if self
            .auxiliary
            .iter()
            .any(|a| a.control.id() == self.primary.id())
        {
            return Err(FusionError::Wiring(format!(
                "primary source `{}` cannot also be auxiliary",
                self.primary.name()
            )));
        }
        if self.primary.is_disposed() {
            return Err(FusionError::Wiring(format!(
                "primary source `{}` is disposed",
                self.primary.name()
            )));
        }
        if let Some(disposed) = self.auxiliary.iter().find(|a| a.control.is_disposed()) {
            return Err(FusionError::Wiring(format!(
                "auxiliary source `{}` is disposed",
                disposed.control.name()
            )));
        }
        if self.transcript.is_stopped() {
            return Err(FusionError::Wiring("transcript is stopped".to_owned()));
        }

        let core = Arc::new(Core {
            primary: self.primary.id(),
            slot: Mutex::new(CycleSlot {
                accumulator: CycleAccumulator::new(0),
                dispatching: false,
            }),
            completion: self.completion,
            prompt_builder: self.prompt_builder,
            agent: self.agent,
            sink: self.sink,
            transcript: self.transcript.clone(),
            outcomes: StreamSource::new("cycle-outcomes"),
            config: self.config,
            disposed: AtomicBool::new(false),
        });

        let mut subscriptions = Vec::with_capacity(self.auxiliary.len() + 2);
        let mut controls = Vec::with_capacity(self.auxiliary.len() + 1);
        controls.push(self.primary.control());

        let weak = Arc::downgrade(&core);
        subscriptions.push(self.primary.subscribe(move |event: &Event<String>| {
            let Some(core) = weak.upgrade() else { return };
            if core.config.echo_primary_to_transcript {
                core.transcript.post_message(Message::at(
                    event.value.clone(),
                    core.config.user_sender.clone(),
                    false,
                    event.capture_time,
                ));
            }
            core.ingest(Arrival::Question(event.clone()));
        }));

        let weak = Arc::downgrade(&core);
        subscriptions.push(self.transcript.subscribe(move |message: &Message| {
            if !message.from_chat {
                return;
            }
            let Some(core) = weak.upgrade() else { return };
            let event = Event::new(core.primary, message.text.clone(), message.timestamp);
            core.ingest(Arrival::Question(event));
        }));

        let mut auxiliary_ids = Vec::with_capacity(self.auxiliary.len());
        for aux in self.auxiliary {
            auxiliary_ids.push(aux.control.id());
            controls.push(Arc::clone(&aux.control));
            subscriptions.push((aux.attach)(Arc::downgrade(&core)));
        }

        info!(
            primary = %self.primary.name(),
            auxiliary = auxiliary_ids.len(),
            "fusion orchestrator started"
        );

        Ok(FusionOrchestrator {
            core,
            primary: self.primary,
            transcript: self.transcript,
            auxiliary_ids,
            controls,
            subscriptions: Mutex::new(subscriptions),
        })
    }
}

/// Merges a primary question stream with up to three auxiliary context
/// streams and dispatches each completed cycle to a chat agent.
///
/// Subscriptions hold the orchestrator weakly: dropping the last handle
/// stops cycle processing without disposing the inputs.
pub struct FusionOrchestrator {
    core: Arc<Core>,
    primary: StreamSource<String>,
    transcript: Transcript,
    auxiliary_ids: Vec<SourceId>,
    controls: Vec<Arc<dyn SourceControl>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl FusionOrchestrator {
    pub fn builder(
        primary: &StreamSource<String>,
        transcript: &Transcript,
        agent: Arc<dyn ChatAgent>,
        sink: Arc<dyn OutputSink>,
    ) -> FusionOrchestratorBuilder {
        FusionOrchestratorBuilder {
            primary: primary.clone(),
            transcript: transcript.clone(),
            agent,
            sink,
            auxiliary: Vec::new(),
            completion: Box::new(QuestionOnly),
            prompt_builder: Box::new(QuestionPrompt),
            config: CycleConfig::default(),
        }
    }

    pub fn state(&self) -> CycleState {
        if lock(&self.core.slot).dispatching {
            CycleState::Dispatching
        } else {
            CycleState::Accumulating
        }
    }

    /// Sequence number of the cycle currently accumulating.
    pub fn cycle(&self) -> u64 {
        lock(&self.core.slot).accumulator.cycle()
    }

    /// Question recorded in the accumulating cycle, if any.
    pub fn pending_question(&self) -> Option<String> {
        lock(&self.core.slot)
            .accumulator
            .question()
            .map(|q| q.value.clone())
    }

    /// Auxiliary events buffered in the accumulating cycle.
    pub fn pending_events(&self) -> usize {
        lock(&self.core.slot).accumulator.len()
    }

    pub fn primary(&self) -> &StreamSource<String> {
        &self.primary
    }

    pub fn auxiliary_ids(&self) -> &[SourceId] {
        &self.auxiliary_ids
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// One event per dispatched cycle, successful or not. Completes on
    /// dispose.
    pub fn outcomes(&self) -> &StreamSource<CycleOutcome> {
        &self.core.outcomes
    }

    /// Detach from all inputs, dispose them and stop the transcript.
    ///
    /// An in-flight dispatch runs to completion; its transcript post is
    /// dropped once the transcript is stopped. Idempotent.
    pub fn dispose(&self) {
        if self.core.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        for control in &self.controls {
            control.dispose();
        }
        self.core.outcomes.dispose();
        self.transcript.stop();
        info!("fusion orchestrator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }
}

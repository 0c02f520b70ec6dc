//! Stream handlers: sources that derive their output from 1..=3 upstreams.
//!
//! A handler merges the events of its upstream sources into one logical
//! input stream (each upstream value is mapped into the handler's input
//! type, keeping its `SourceId` and capture time) and runs
//! [`Handler::handle`] per event under a [`HandlerPolicy`].
//!
//! Failures inside `handle`, returned errors and panics alike, are logged and
//! swallowed so the upstream subscription keeps running.

use crate::error::{FusionError, Result};
use crate::stream::{Event, SourceControl, SourceId, StreamSource, Subscription};
use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, trace, warn};

/// Maximum number of upstream sources a handler may merge.
pub const MAX_UPSTREAMS: usize = 3;

/// How incoming events are scheduled onto [`Handler::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPolicy {
    /// Every event is handled on its own thread; handling event N never
    /// delays delivery of event N+1.
    Concurrent,
    /// Events are handled one at a time, in arrival order, on a dedicated
    /// worker thread.
    SerializedQueue,
    /// Events are handled one at a time on a dedicated worker thread; an
    /// event arriving while another is being handled is dropped. The
    /// producer never waits on `handle`.
    SerializedDropIfBusy,
}

/// Per-event derivation logic of a stream handler.
///
/// With [`HandlerPolicy::Concurrent`] `handle` runs on several threads at
/// once, so implementations guard any shared buffers themselves.
pub trait Handler: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Derive zero or more output events from `event` by emitting on `out`.
    fn handle(&self, event: Event<Self::Input>, out: &StreamSource<Self::Output>)
    -> anyhow::Result<()>;
}

/// Adapter turning a closure into a [`Handler`].
pub struct FnHandler<I, O, F> {
    f: F,
    _types: PhantomData<fn(I) -> O>,
}

/// Build a handler from a closure.
pub fn handler_fn<I, O, F>(f: F) -> FnHandler<I, O, F>
where
    F: Fn(Event<I>, &StreamSource<O>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    FnHandler {
        f,
        _types: PhantomData,
    }
}

impl<I, O, F> Handler for FnHandler<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(Event<I>, &StreamSource<O>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn handle(&self, event: Event<I>, out: &StreamSource<O>) -> anyhow::Result<()> {
        (self.f)(event, out)
    }
}

enum Mode<I> {
    Concurrent,
    Queue(crossbeam_channel::Sender<Event<I>>),
    DropIfBusy {
        busy: Arc<AtomicBool>,
        tx: crossbeam_channel::Sender<Event<I>>,
    },
}

struct Dispatch<H: Handler> {
    name: String,
    handler: Arc<H>,
    output: StreamSource<H::Output>,
    mode: Mode<H::Input>,
}

impl<H: Handler> Dispatch<H> {
    fn deliver(self: &Arc<Self>, event: Event<H::Input>) {
        match &self.mode {
            Mode::Concurrent => {
                let this = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name(format!("consens-{}", self.name))
                    .spawn(move || run_handler(&*this.handler, &this.name, event, &this.output));
                if let Err(e) = spawned {
                    warn!(handler = %self.name, error = %e, "failed to spawn handler thread; event dropped");
                }
            }
            Mode::Queue(tx) => {
                if tx.send(event).is_err() {
                    debug!(handler = %self.name, "handler worker gone; event dropped");
                }
            }
            Mode::DropIfBusy { busy, tx } => {
                if busy
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    trace!(handler = %self.name, source = %event.source, "handler busy; dropping overlapping event");
                    return;
                }
                // At most one event is ever in the channel, so this never blocks.
                if tx.send(event).is_err() {
                    busy.store(false, Ordering::Release);
                    debug!(handler = %self.name, "handler worker gone; event dropped");
                }
            }
        }
    }
}

fn run_handler<H: Handler>(
    handler: &H,
    name: &str,
    event: Event<H::Input>,
    output: &StreamSource<H::Output>,
) {
    if output.is_disposed() {
        return;
    }
    let source = event.source;
    match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event, output))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(handler = %name, source = %source, error = %e, "handler failed; continuing");
        }
        Err(payload) => {
            error!(
                handler = %name,
                source = %source,
                panic = %panic_message(payload.as_ref()),
                "handler panicked; continuing"
            );
        }
    }
}

/// Run `handler` over `rx` on a named thread until every sender is gone.
/// `busy` is cleared after each event.
fn spawn_worker<H: Handler>(
    name: &str,
    handler: Arc<H>,
    output: StreamSource<H::Output>,
    rx: crossbeam_channel::Receiver<Event<H::Input>>,
    busy: Option<Arc<AtomicBool>>,
) -> Result<()> {
    let worker_name = name.to_owned();
    thread::Builder::new()
        .name(format!("consens-{name}"))
        .spawn(move || {
            for event in rx {
                run_handler(&*handler, &worker_name, event, &output);
                if let Some(busy) = &busy {
                    busy.store(false, Ordering::Release);
                }
            }
            debug!(handler = %worker_name, "handler worker stopped");
        })
        .map(|_| ())
        .map_err(|e| FusionError::Wiring(format!("failed to spawn worker for handler `{name}`: {e}")))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

type Deliver<I> = Arc<dyn Fn(Event<I>) + Send + Sync>;
type Attach<I> = Box<dyn FnOnce(Deliver<I>) -> Subscription + Send>;

struct Upstream<I> {
    control: Arc<dyn SourceControl>,
    attach: Attach<I>,
}

/// Builder for a [`StreamHandler`].
pub struct StreamHandlerBuilder<H: Handler> {
    name: String,
    policy: HandlerPolicy,
    handler: Arc<H>,
    upstreams: Vec<Upstream<H::Input>>,
}

impl<H: Handler> StreamHandlerBuilder<H> {
    /// Merge `source` into this handler's input, converting its values
    /// with `map`.
    pub fn upstream<T, F>(mut self, source: &StreamSource<T>, map: F) -> Self
    where
        T: Clone + Send + 'static,
        F: Fn(T) -> H::Input + Send + Sync + 'static,
    {
        let upstream = source.clone();
        self.upstreams.push(Upstream {
            control: source.control(),
            attach: Box::new(move |deliver: Deliver<H::Input>| {
                upstream.subscribe(move |event: &Event<T>| deliver(event.clone().map(&map)))
            }),
        });
        self
    }

    /// Wire the upstream subscriptions and start the handler.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Wiring`] when the upstream count is outside
    /// `1..=MAX_UPSTREAMS` or a worker thread cannot be spawned.
    pub fn build(self) -> Result<StreamHandler<H>> {
        if self.upstreams.is_empty() || self.upstreams.len() > MAX_UPSTREAMS {
            return Err(FusionError::Wiring(format!(
                "handler `{}` needs 1 to {MAX_UPSTREAMS} upstream sources, got {}",
                self.name,
                self.upstreams.len()
            )));
        }
        if let Some(disposed) = self.upstreams.iter().find(|u| u.control.is_disposed()) {
            return Err(FusionError::Wiring(format!(
                "handler `{}` cannot subscribe to disposed source `{}`",
                self.name,
                disposed.control.name()
            )));
        }

        let output = StreamSource::new(self.name.clone());
        let mode = match self.policy {
            HandlerPolicy::Concurrent => Mode::Concurrent,
            HandlerPolicy::SerializedDropIfBusy => {
                let (tx, rx) = crossbeam_channel::bounded::<Event<H::Input>>(1);
                let busy = Arc::new(AtomicBool::new(false));
                spawn_worker(
                    &self.name,
                    Arc::clone(&self.handler),
                    output.clone(),
                    rx,
                    Some(Arc::clone(&busy)),
                )?;
                Mode::DropIfBusy { busy, tx }
            }
            HandlerPolicy::SerializedQueue => {
                let (tx, rx) = crossbeam_channel::unbounded::<Event<H::Input>>();
                spawn_worker(&self.name, Arc::clone(&self.handler), output.clone(), rx, None)?;
                Mode::Queue(tx)
            }
        };

        let dispatch = Arc::new(Dispatch {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
            output: output.clone(),
            mode,
        });
        let deliver: Deliver<H::Input> = Arc::new(move |event| dispatch.deliver(event));

        let mut upstream_ids = Vec::with_capacity(self.upstreams.len());
        for upstream in self.upstreams {
            upstream_ids.push(upstream.control.id());
            output.adopt(Arc::clone(&upstream.control));
            // Standing subscription: released when the upstream is disposed.
            let _subscription = (upstream.attach)(Arc::clone(&deliver));
        }

        Ok(StreamHandler {
            name: self.name,
            policy: self.policy,
            handler: self.handler,
            output,
            upstream_ids,
        })
    }
}

/// A stream source whose events are derived from 1..=3 upstream sources.
///
/// The handler owns its upstreams: disposing it disposes them first and
/// then completes its own output stream.
///
/// Dropping a `StreamHandler` does not stop it. The upstream subscriptions
/// and, for the serialized policies, the worker thread stay alive until
/// [`StreamHandler::dispose`] is called or every upstream is disposed.
pub struct StreamHandler<H: Handler> {
    name: String,
    policy: HandlerPolicy,
    handler: Arc<H>,
    output: StreamSource<H::Output>,
    upstream_ids: Vec<SourceId>,
}

impl<H: Handler> StreamHandler<H> {
    pub fn builder(name: impl Into<String>, policy: HandlerPolicy, handler: H) -> StreamHandlerBuilder<H> {
        StreamHandlerBuilder {
            name: name.into(),
            policy,
            handler: Arc::new(handler),
            upstreams: Vec::new(),
        }
    }

    /// The derived stream.
    pub fn output(&self) -> &StreamSource<H::Output> {
        &self.output
    }

    pub fn id(&self) -> SourceId {
        self.output.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> HandlerPolicy {
        self.policy
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn upstream_ids(&self) -> &[SourceId] {
        &self.upstream_ids
    }

    pub fn pause(&self) {
        self.output.pause();
    }

    pub fn resume(&self) {
        self.output.resume();
    }

    /// Dispose the upstreams, then complete the output stream. Idempotent.
    /// In-flight `handle` calls finish but can no longer emit.
    pub fn dispose(&self) {
        self.output.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.output.is_disposed()
    }
}

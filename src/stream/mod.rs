//! Typed event producers that everything else composes over.
//!
//! A [`StreamSource`] pushes timestamped [`Event`]s synchronously to its
//! current subscribers. It can be paused (events are dropped, never queued)
//! and disposed (terminal; subscribers receive a completion signal once).
//!
//! Sources are cheap handles: cloning a `StreamSource` yields another handle
//! to the same producer, so adapters, handlers and the orchestrator can all
//! refer to one microphone or camera stream.

pub mod handler;

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opaque, process-unique identity of a stream source.
///
/// Used as a map key when attributing events to their producer. It carries
/// no ordering meaning beyond creation order of the sources themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// A timestamped value tagged with the source that produced it.
///
/// `capture_time` is when the underlying phenomenon happened, not when the
/// event was processed. Producers may backdate it (a transcription that
/// finishes seconds after the audio ended carries the speech start time).
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub source: SourceId,
    pub value: T,
    pub capture_time: DateTime<Utc>,
}

impl<T> Event<T> {
    pub fn new(source: SourceId, value: T, capture_time: DateTime<Utc>) -> Self {
        Self {
            source,
            value,
            capture_time,
        }
    }

    /// Transform the value, keeping source and capture time.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        Event {
            source: self.source,
            value: f(self.value),
            capture_time: self.capture_time,
        }
    }
}

/// Object-safe control surface shared by every source regardless of its
/// value type.
pub trait SourceControl: Send + Sync {
    fn id(&self) -> SourceId;
    fn name(&self) -> &str;
    /// Suppress emission. Idempotent.
    fn pause(&self);
    /// Re-enable emission. Idempotent.
    fn resume(&self);
    fn is_paused(&self) -> bool;
    /// Mark terminal, cascade to owned sources, complete subscribers.
    /// Idempotent.
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

type EventCallback<T> = Arc<dyn Fn(&Event<T>) + Send + Sync>;
type CompletionCallback = Box<dyn FnOnce() + Send>;

struct Subscriber<T> {
    id: u64,
    on_event: EventCallback<T>,
    on_complete: Option<CompletionCallback>,
}

struct SourceInner<T> {
    id: SourceId,
    name: String,
    paused: AtomicBool,
    disposed: AtomicBool,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    owned: Mutex<Vec<Arc<dyn SourceControl>>>,
}

/// A pushable, pausable, disposable producer of `Event<T>`.
///
/// `emit` may be called from any thread. Delivery happens on the calling
/// thread, to a snapshot of the subscribers taken at emit time, so a
/// subscriber may itself subscribe, emit or post without deadlocking.
pub struct StreamSource<T> {
    inner: Arc<SourceInner<T>>,
}

impl<T> Clone for StreamSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for StreamSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("paused", &self.inner.paused.load(Ordering::Relaxed))
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Send + 'static> StreamSource<T> {
    /// Create a new, unpaused source with no subscribers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                id: SourceId::next(),
                name: name.into(),
                paused: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
                owned: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Emit `value` stamped with the current time.
    ///
    /// Returns `false` if the event was dropped because the source is paused
    /// or disposed.
    pub fn emit(&self, value: T) -> bool {
        self.emit_at(value, Utc::now())
    }

    /// Emit `value` with an explicit capture time.
    pub fn emit_at(&self, value: T, capture_time: DateTime<Utc>) -> bool {
        if self.inner.disposed.load(Ordering::Acquire) || self.inner.paused.load(Ordering::Acquire)
        {
            return false;
        }

        let event = Event::new(self.inner.id, value, capture_time);
        let callbacks: Vec<EventCallback<T>> = lock(&self.inner.subscribers)
            .iter()
            .map(|s| Arc::clone(&s.on_event))
            .collect();
        for callback in callbacks {
            callback(&event);
        }
        true
    }

    /// Attach a subscriber. Events emitted before this call are not replayed.
    pub fn subscribe<F>(&self, on_event: F) -> Subscription
    where
        F: Fn(&Event<T>) + Send + Sync + 'static,
    {
        self.attach(Arc::new(on_event), None)
    }

    /// Attach a subscriber that is also told when the source completes.
    ///
    /// Subscribing to an already disposed source completes immediately.
    pub fn subscribe_with_completion<F, C>(&self, on_event: F, on_complete: C) -> Subscription
    where
        F: Fn(&Event<T>) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.attach(Arc::new(on_event), Some(Box::new(on_complete)))
    }

    fn attach(
        &self,
        on_event: EventCallback<T>,
        on_complete: Option<CompletionCallback>,
    ) -> Subscription {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = lock(&self.inner.subscribers);
            // Checked under the lock so a concurrent dispose cannot miss us.
            if !self.inner.disposed.load(Ordering::Acquire) {
                subscribers.push(Subscriber {
                    id,
                    on_event,
                    on_complete,
                });
                let weak = Arc::downgrade(&self.inner);
                return Subscription::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        lock(&inner.subscribers).retain(|s| s.id != id);
                    }
                });
            }
        }
        if let Some(complete) = on_complete {
            complete();
        }
        Subscription::inert()
    }

    /// Register a source whose lifetime this source owns. Disposing `self`
    /// disposes `owned` first.
    pub fn adopt(&self, owned: Arc<dyn SourceControl>) {
        if self.inner.disposed.load(Ordering::Acquire) {
            owned.dispose();
            return;
        }
        lock(&self.inner.owned).push(owned);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Type-erased handle to this source.
    pub fn control(&self) -> Arc<dyn SourceControl> {
        Arc::new(self.clone())
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let owned = std::mem::take(&mut *lock(&self.inner.owned));
        for source in owned {
            source.dispose();
        }

        let subscribers = {
            // Same lock as `attach`, so late subscribers see `disposed`.
            let mut guard = lock(&self.inner.subscribers);
            std::mem::take(&mut *guard)
        };
        for subscriber in subscribers {
            if let Some(complete) = subscriber.on_complete {
                complete();
            }
        }

        debug!(source = %self.inner.id, name = %self.inner.name, "stream source disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> SourceControl for StreamSource<T> {
    fn id(&self) -> SourceId {
        StreamSource::id(self)
    }

    fn name(&self) -> &str {
        StreamSource::name(self)
    }

    fn pause(&self) {
        StreamSource::pause(self);
    }

    fn resume(&self) {
        StreamSource::resume(self);
    }

    fn is_paused(&self) -> bool {
        StreamSource::is_paused(self)
    }

    fn dispose(&self) {
        StreamSource::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        StreamSource::is_disposed(self)
    }
}

/// Handle to an attached subscriber.
///
/// Dropping a subscription leaves the subscriber attached (a standing
/// subscription); call [`Subscription::unsubscribe`] to detach it.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    fn inert() -> Self {
        Self { detach: None }
    }

    /// Detach the subscriber. Later events are not delivered to it.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

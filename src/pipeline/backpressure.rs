//! Pause/resume wiring between streams.
//!
//! Used to stop the microphone from capturing the robot's own voice: pause
//! audio when an utterance has been cut, resume it when playback ends.

use crate::stream::{Event, SourceControl, StreamSource, Subscription};
use std::sync::Arc;
use tracing::debug;

/// Pause `target` every time `trigger` emits.
pub fn pause_on<T: Send + 'static>(
    trigger: &StreamSource<T>,
    target: Arc<dyn SourceControl>,
) -> Subscription {
    trigger.subscribe(move |event: &Event<T>| {
        debug!(trigger = %event.source, target = %target.name(), "pausing source");
        target.pause();
    })
}

/// Resume `target` every time `trigger` emits.
pub fn resume_on<T: Send + 'static>(
    trigger: &StreamSource<T>,
    target: Arc<dyn SourceControl>,
) -> Subscription {
    resume_when(trigger, target, |_| true)
}

/// Resume `target` whenever `trigger` emits a value accepted by `accept`.
pub fn resume_when<T, F>(
    trigger: &StreamSource<T>,
    target: Arc<dyn SourceControl>,
    accept: F,
) -> Subscription
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    trigger.subscribe(move |event: &Event<T>| {
        if accept(&event.value) {
            debug!(trigger = %event.source, target = %target.name(), "resuming source");
            target.resume();
        }
    })
}

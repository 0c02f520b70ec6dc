//! Conversation transcript and the feedback path from the chat surface.
//!
//! Every posted [`Message`] is recorded in a bounded history and emitted on
//! the transcript stream. Display sinks subscribe to that stream; the
//! orchestrator subscribes too and re-injects messages flagged `from_chat`
//! as primary-input events.

use crate::stream::{Event, StreamSource, Subscription, lock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Default number of messages retained in the transcript history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// A transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: String,
    /// Message text content.
    pub text: String,
    /// Display name of the sender.
    pub sender: String,
    /// True when the text was typed into the chat surface by a user, as
    /// opposed to agent, system or natively captured text.
    pub from_chat: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(text: impl Into<String>, sender: impl Into<String>, from_chat: bool) -> Self {
        Self::at(text, sender, from_chat, Utc::now())
    }

    pub fn at(
        text: impl Into<String>,
        sender: impl Into<String>,
        from_chat: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            sender: sender.into(),
            from_chat,
            timestamp,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, self.text)
    }
}

/// External surface that displays transcript messages (chat UI, socket,
/// terminal).
pub trait TranscriptSink: Send + Sync {
    fn show(&self, message: &Message) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Delivery {
    queue: VecDeque<Message>,
    draining: bool,
}

/// Clears the draining flag if a subscriber panics mid-delivery. Queued
/// messages stay queued and go out ahead of the next post.
struct DrainGuard<'a>(&'a Mutex<Delivery>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut delivery = lock(self.0);
            delivery.draining = false;
            warn!(
                queued = delivery.queue.len(),
                "transcript subscriber panicked; queued messages wait for the next post"
            );
        }
    }
}

/// Message bus between the conversation engine and the chat surface.
///
/// Delivery is FIFO across all posting threads: a message posted while
/// another is being delivered, including from inside a subscriber, is queued
/// and delivered afterwards by the thread already delivering. Every
/// subscriber therefore sees a question before the answer it triggered.
#[derive(Clone)]
pub struct Transcript {
    stream: StreamSource<Message>,
    history: Arc<Mutex<VecDeque<Message>>>,
    delivery: Arc<Mutex<Delivery>>,
    capacity: usize,
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        Self {
            stream: StreamSource::new("transcript"),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            delivery: Arc::new(Mutex::new(Delivery::default())),
            capacity,
        }
    }

    /// Post a new message stamped with the current time.
    pub fn post(&self, text: impl Into<String>, sender: impl Into<String>, from_chat: bool) -> Message {
        let message = Message::new(text, sender, from_chat);
        self.post_message(message.clone());
        message
    }

    /// Post a fully formed message (e.g. one received from a chat client
    /// with its own timestamp).
    pub fn post_message(&self, message: Message) {
        if self.stream.is_disposed() {
            debug!(sender = %message.sender, "transcript stopped; message dropped");
            return;
        }
        {
            let mut delivery = lock(&self.delivery);
            if self.capacity > 0 {
                let mut history = lock(&self.history);
                if history.len() >= self.capacity {
                    history.pop_front();
                }
                history.push_back(message.clone());
            }
            delivery.queue.push_back(message);
            if delivery.draining {
                return;
            }
            delivery.draining = true;
        }

        let _guard = DrainGuard(&self.delivery);
        loop {
            let next = {
                let mut delivery = lock(&self.delivery);
                match delivery.queue.pop_front() {
                    Some(message) => message,
                    None => {
                        delivery.draining = false;
                        return;
                    }
                }
            };
            let timestamp = next.timestamp;
            self.stream.emit_at(next, timestamp);
        }
    }

    /// Listen to every message posted from now on.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.stream
            .subscribe(move |event: &Event<Message>| listener(&event.value))
    }

    /// Forward every message to `sink`. Sink failures are logged.
    pub fn attach_display(&self, sink: Arc<dyn TranscriptSink>) -> Subscription {
        self.subscribe(move |message| {
            if let Err(e) = sink.show(message) {
                warn!(message_id = %message.id, error = %e, "transcript display failed");
            }
        })
    }

    /// The underlying message stream.
    pub fn stream(&self) -> &StreamSource<Message> {
        &self.stream
    }

    /// Retained messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Complete the message stream. Later posts are dropped. Idempotent.
    pub fn stop(&self) {
        self.stream.dispose();
    }

    pub fn is_stopped(&self) -> bool {
        self.stream.is_disposed()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

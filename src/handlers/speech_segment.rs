//! Cuts utterances out of the audio stream using speech intent.
//!
//! A pre-roll window of recent chunks is kept at all times so the start of
//! an utterance, spoken before intent was confirmed, is not lost.

use crate::config::SpeechConfig;
use crate::error::Result;
use crate::pipeline::messages::{AudioChunk, SpeechIntent, SpeechSegment};
use crate::stream::handler::{Handler, HandlerPolicy, StreamHandler};
use crate::stream::{Event, StreamSource, lock};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

/// Input merged from the audio and intent streams.
#[derive(Debug, Clone)]
pub enum SegmentInput {
    Audio(AudioChunk),
    Intent(SpeechIntent),
}

struct OpenSegment {
    started_at: DateTime<Utc>,
    chunks: Vec<AudioChunk>,
}

struct SegmenterState {
    intent: SpeechIntent,
    pre_roll: VecDeque<(DateTime<Utc>, AudioChunk)>,
    open: Option<OpenSegment>,
}

pub struct SpeechSegmenter {
    min_duration_secs: f64,
    window_chunks: usize,
    state: Mutex<SegmenterState>,
}

impl SpeechSegmenter {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            min_duration_secs: config.min_speech_duration_secs,
            window_chunks: config.sliding_window_chunks(),
            state: Mutex::new(SegmenterState {
                intent: SpeechIntent::default(),
                pre_roll: VecDeque::new(),
                open: None,
            }),
        }
    }

    /// Wire a segmenter onto `audio` and `intents` with a serialized queue.
    pub fn wire(
        audio: &StreamSource<AudioChunk>,
        intents: &StreamSource<SpeechIntent>,
        config: &SpeechConfig,
    ) -> Result<StreamHandler<Self>> {
        StreamHandler::builder(
            "speech-segmenter",
            HandlerPolicy::SerializedQueue,
            Self::new(config),
        )
        .upstream(audio, SegmentInput::Audio)
        .upstream(intents, SegmentInput::Intent)
        .build()
    }

    /// Whether an utterance is currently being recorded.
    pub fn is_recording(&self) -> bool {
        lock(&self.state).open.is_some()
    }

    fn on_audio(
        &self,
        state: &mut SegmenterState,
        chunk: AudioChunk,
        at: DateTime<Utc>,
    ) -> Option<(SpeechSegment, DateTime<Utc>)> {
        state.pre_roll.push_back((at, chunk.clone()));
        while state.pre_roll.len() > self.window_chunks {
            state.pre_roll.pop_front();
        }
        if let Some(open) = state.open.as_mut() {
            open.chunks.push(chunk);
        }

        let speaking = state.intent.intends_speaking();
        if speaking && state.open.is_none() {
            let started_at = state.pre_roll.front().map_or(at, |(t, _)| *t);
            debug!(pre_roll = state.pre_roll.len(), "speech onset");
            state.open = Some(OpenSegment {
                started_at,
                chunks: state.pre_roll.iter().map(|(_, c)| c.clone()).collect(),
            });
            return None;
        }
        if !speaking {
            let open = state.open.take()?;
            return self.close(open);
        }
        None
    }

    fn close(&self, open: OpenSegment) -> Option<(SpeechSegment, DateTime<Utc>)> {
        let sample_rate = open.chunks.first().map_or(0, |c| c.sample_rate);
        let duration_secs: f64 = open.chunks.iter().map(AudioChunk::duration_secs).sum();
        if duration_secs <= self.min_duration_secs {
            info!(
                duration_secs,
                min = self.min_duration_secs,
                "utterance too short; discarded"
            );
            return None;
        }
        let samples: Vec<f32> = open.chunks.into_iter().flat_map(|c| c.samples).collect();
        info!(duration_secs, "utterance captured");
        Some((
            SpeechSegment {
                samples,
                sample_rate,
                duration_secs,
            },
            open.started_at,
        ))
    }
}

impl Handler for SpeechSegmenter {
    type Input = SegmentInput;
    type Output = SpeechSegment;

    fn handle(&self, event: Event<SegmentInput>, out: &StreamSource<SpeechSegment>) -> anyhow::Result<()> {
        let finished = {
            let mut state = lock(&self.state);
            match event.value {
                SegmentInput::Intent(intent) => {
                    state.intent = intent;
                    None
                }
                SegmentInput::Audio(chunk) => self.on_audio(&mut state, chunk, event.capture_time),
            }
        };
        if let Some((segment, started_at)) = finished {
            out.emit_at(segment, started_at);
        }
        Ok(())
    }
}

//! Speech-intent detection from face and voice activity.
//!
//! Three boolean sliding windows (mouth movement, eye contact, voiced audio)
//! each turn into a flag when their mean exceeds the probability threshold.
//! While the person is judged to be speaking the windows use `end_window`,
//! otherwise `start_window`, so onset and release can be tuned separately.

use crate::config::IntentConfig;
use crate::error::Result;
use crate::pipeline::messages::{AudioChunk, FaceObservation, SpeechIntent};
use crate::stream::handler::{Handler, HandlerPolicy, StreamHandler};
use crate::stream::{Event, StreamSource, lock};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::trace;

/// Classifies one short audio frame as voiced or not.
pub trait VoiceActivityDetector: Send + Sync {
    fn is_speech(&self, frame: &[f32], sample_rate: u32) -> bool;
}

/// RMS energy gate.
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&self, frame: &[f32], _sample_rate: u32) -> bool {
        compute_rms_energy(frame) > self.threshold
    }
}

fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Input merged from the face and audio streams.
#[derive(Debug, Clone)]
pub enum IntentInput {
    Face(FaceObservation),
    Audio(AudioChunk),
}

struct Windows {
    mouth: VecDeque<bool>,
    gaze: VecDeque<bool>,
    speech: VecDeque<bool>,
    current: SpeechIntent,
}

pub struct SpeechIntentDetector {
    config: IntentConfig,
    vad: Box<dyn VoiceActivityDetector>,
    windows: Mutex<Windows>,
}

impl SpeechIntentDetector {
    pub fn new(config: IntentConfig, vad: Box<dyn VoiceActivityDetector>) -> Self {
        Self {
            config,
            vad,
            windows: Mutex::new(Windows {
                mouth: VecDeque::new(),
                gaze: VecDeque::new(),
                speech: VecDeque::new(),
                current: SpeechIntent::default(),
            }),
        }
    }

    /// Wire a detector onto `faces` and `audio` with a serialized queue.
    pub fn wire(
        faces: &StreamSource<FaceObservation>,
        audio: &StreamSource<AudioChunk>,
        config: IntentConfig,
        vad: Box<dyn VoiceActivityDetector>,
    ) -> Result<StreamHandler<Self>> {
        StreamHandler::builder(
            "speech-intent",
            HandlerPolicy::SerializedQueue,
            Self::new(config, vad),
        )
        .upstream(faces, IntentInput::Face)
        .upstream(audio, IntentInput::Audio)
        .build()
    }

    /// Most recent estimate.
    pub fn current(&self) -> SpeechIntent {
        lock(&self.windows).current
    }

    fn observe_face(&self, windows: &mut Windows, face: &FaceObservation) {
        let (moving, gazing) = match face {
            FaceObservation::NoFace => (false, false),
            FaceObservation::Face {
                mouth_angle_fluctuation,
                gaze_angle_radians,
                ..
            } => (
                *mouth_angle_fluctuation > self.config.mouth_fluctuation_threshold,
                *gaze_angle_radians < self.config.gaze_angle_threshold,
            ),
        };
        windows.mouth.push_back(moving);
        windows.gaze.push_back(gazing);
    }

    fn observe_audio(&self, windows: &mut Windows, chunk: &AudioChunk) {
        let frame_len =
            (chunk.sample_rate as usize * self.config.vad_frame_ms as usize / 1000).max(1);
        for frame in chunk.samples.chunks_exact(frame_len) {
            windows
                .speech
                .push_back(self.vad.is_speech(frame, chunk.sample_rate));
        }
    }

    fn estimate(&self, windows: &mut Windows) -> SpeechIntent {
        let len = if windows.current.intends_speaking() {
            self.config.end_window
        } else {
            self.config.start_window
        };
        let threshold = self.config.probability_threshold;
        for window in [&mut windows.mouth, &mut windows.gaze, &mut windows.speech] {
            while window.len() > len {
                window.pop_front();
            }
        }
        windows.current = SpeechIntent {
            is_moving_mouth: exceeds(&windows.mouth, threshold),
            has_eye_contact: exceeds(&windows.gaze, threshold),
            is_speech: exceeds(&windows.speech, threshold),
        };
        windows.current
    }
}

/// Whether the share of `true` samples in `window` is above `threshold`.
fn exceeds(window: &VecDeque<bool>, threshold: f32) -> bool {
    if window.is_empty() {
        return false;
    }
    let positive = window.iter().filter(|b| **b).count();
    positive as f32 / window.len() as f32 > threshold
}

impl Handler for SpeechIntentDetector {
    type Input = IntentInput;
    type Output = SpeechIntent;

    fn handle(&self, event: Event<IntentInput>, out: &StreamSource<SpeechIntent>) -> anyhow::Result<()> {
        let intent = {
            let mut windows = lock(&self.windows);
            match &event.value {
                IntentInput::Face(face) => self.observe_face(&mut windows, face),
                IntentInput::Audio(chunk) => self.observe_audio(&mut windows, chunk),
            }
            self.estimate(&mut windows)
        };
        trace!(?intent, "speech intent updated");
        out.emit_at(intent, event.capture_time);
        Ok(())
    }
}

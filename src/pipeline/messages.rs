//! Value types carried by the sensor and derived streams.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A chunk of raw audio samples from the microphone adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// A complete utterance cut out of the audio stream, ready for
/// transcription and vocal-emotion classification.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Concatenated audio samples for the entire utterance.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Duration of the utterance in seconds.
    pub duration_secs: f64,
}

/// Per-frame face analysis delivered by the vision adapter.
///
/// Face geometry itself is computed outside this crate; the engine only
/// consumes the two scalar signals it derives speech intent from.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceObservation {
    /// No face in the frame.
    NoFace,
    /// A face was found.
    Face {
        /// Fluctuation of the mouth opening angle over recent frames.
        mouth_angle_fluctuation: f32,
        /// Angle between gaze direction and the camera axis, in radians.
        gaze_angle_radians: f32,
        /// Cropped face region (RGB bytes) for expression classifiers.
        region: Vec<u8>,
    },
}

/// Whether the person in front of the robot appears to be addressing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechIntent {
    pub is_moving_mouth: bool,
    pub has_eye_contact: bool,
    pub is_speech: bool,
}

impl SpeechIntent {
    /// True when mouth movement, eye contact and voice activity all agree.
    pub fn intends_speaking(&self) -> bool {
        self.is_moving_mouth && self.has_eye_contact && self.is_speech
    }
}

/// Emotion label → probability in `0.0..=1.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionScores(pub BTreeMap<String, f32>);

impl EmotionScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, score: f32) {
        self.0.insert(label.into(), score);
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.get(label).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Rewrite classifier-specific labels to the canonical vocabulary.
    /// Labels that collapse onto the same name keep the higher score.
    pub fn normalized(self) -> Self {
        let mut out = BTreeMap::new();
        for (label, score) in self.0 {
            let slot = out.entry(normalize_emotion_label(&label)).or_insert(score);
            if score > *slot {
                *slot = score;
            }
        }
        Self(out)
    }
}

/// (classifier label, canonical label)
const LABEL_ALIASES: &[(&str, &str)] = &[
    ("anger", "angry"),
    ("disgust", "disgusted"),
    ("fear", "fearful"),
    ("happiness", "happy"),
    ("sadness", "sad"),
    ("surprise", "surprised"),
    ("<unk>", "unknown"),
    ("other", "unknown"),
];

/// Map a raw classifier label to its canonical lowercase form. Multilingual
/// labels such as `生气/angry` keep only their last segment; unknown labels
/// are lowercased and passed through.
pub fn normalize_emotion_label(label: &str) -> String {
    let label = label.rsplit('/').next().unwrap_or(label);
    let lower = label.trim().to_lowercase();
    LABEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map_or(lower.clone(), |(_, canonical)| (*canonical).to_owned())
}

impl<L: Into<String>> FromIterator<(L, f32)> for EmotionScores {
    fn from_iter<I: IntoIterator<Item = (L, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(l, s)| (l.into(), s)).collect())
    }
}

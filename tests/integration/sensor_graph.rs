//! End to end: microphone and camera adapters through the derived handlers
//! into an answered cycle.

use crate::helpers::{FailingAgent, RecordingAgent, wait_for};
use consens::config::{FusionConfig, IntentConfig, SpeechConfig};
use consens::handlers::{EmotionClassifier, EnergyVad, FaceRegionClassifier, FixedTranscriber};
use consens::pipeline::messages::{AudioChunk, EmotionScores, FaceObservation, SpeechSegment};
use consens::pipeline::sensors::{SensorBackends, SensorGraph};
use consens::prompt::emotion::NO_SPEECH_EMOTION;
use consens::sink::ConsoleSink;
use consens::stream::StreamSource;
use consens::transcript::Transcript;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

struct CalmVoice;

impl EmotionClassifier<SpeechSegment> for CalmVoice {
    fn classify(&self, _input: &SpeechSegment) -> anyhow::Result<Option<EmotionScores>> {
        Ok(Some([("neutral", 0.9)].into_iter().collect()))
    }
}

fn config() -> FusionConfig {
    let mut config = FusionConfig::default();
    // 0.5 s chunks, 1 s pre-roll.
    config.speech = SpeechConfig {
        sample_rate: 100,
        chunk_size: 50,
        min_speech_duration_secs: 1.0,
        sliding_window_secs: 1.0,
    };
    config.intent = IntentConfig {
        start_window: 3,
        end_window: 3,
        ..IntentConfig::default()
    };
    config.cycle.await_speech_emotion = true;
    config
}

/// Classifier backend that is down.
struct DeafVoice;

impl EmotionClassifier<SpeechSegment> for DeafVoice {
    fn classify(&self, _input: &SpeechSegment) -> anyhow::Result<Option<EmotionScores>> {
        anyhow::bail!("emotion model not loaded")
    }
}

fn backends() -> SensorBackends {
    backends_with("What time is it?", Box::new(CalmVoice))
}

fn backends_with(
    transcription: &str,
    speech_emotion: Box<dyn EmotionClassifier<SpeechSegment>>,
) -> SensorBackends {
    SensorBackends {
        vad: Box::new(EnergyVad::new(0.01)),
        transcriber: Box::new(FixedTranscriber::new(transcription)),
        facial_expression: Box::new(FaceRegionClassifier::new(|_: &[u8]| {
            Ok([("happy", 0.9)].into_iter().collect())
        })),
        speech_emotion,
    }
}

fn utterance() -> SpeechSegment {
    SpeechSegment {
        samples: vec![0.5; 300],
        sample_rate: 100,
        duration_secs: 3.0,
    }
}

fn engaged_face() -> FaceObservation {
    FaceObservation::Face {
        mouth_angle_fluctuation: 0.05,
        gaze_angle_radians: 0.1,
        region: vec![0; 16],
    }
}

fn loud_chunk() -> AudioChunk {
    AudioChunk {
        samples: vec![0.5; 50],
        sample_rate: 100,
    }
}

#[test]
fn spoken_question_is_answered_with_face_and_voice_context() {
    let config = config();
    let audio = StreamSource::<AudioChunk>::new("microphone");
    let faces = StreamSource::<FaceObservation>::new("camera");
    let graph = SensorGraph::wire(&audio, &faces, backends(), &config).unwrap();

    let transcript = Transcript::default();
    let agent = RecordingAgent::new();
    let sink = Arc::new(ConsoleSink::new());
    let _resume = graph.resume_audio_on(sink.speech_ended());
    let orchestrator = graph
        .orchestrator(&transcript, agent.clone(), sink.clone(), &config)
        .unwrap();

    for _ in 0..3 {
        faces.emit(engaged_face());
    }
    for _ in 0..6 {
        audio.emit(loud_chunk());
        sleep(Duration::from_millis(30));
    }
    for _ in 0..3 {
        faces.emit(FaceObservation::NoFace);
    }
    sleep(Duration::from_millis(50));
    // Closes the utterance; the microphone is paused from here on.
    audio.emit(loud_chunk());

    assert!(wait_for(Duration::from_secs(5), || !agent.prompts().is_empty()));
    let prompt = agent.prompts().remove(0);
    assert_eq!(prompt.get("question"), Some("What time is it?"));
    assert_eq!(prompt.get("facial_expressions"), Some("Looks (very likely) happy."));
    assert_eq!(prompt.get("speech_emotions"), Some("Sounds (very likely) neutral."));

    // The answer was delivered, so the microphone listens again.
    assert!(wait_for(Duration::from_secs(1), || !audio.is_paused()));
    let senders: Vec<String> = transcript.messages().into_iter().map(|m| m.sender).collect();
    assert_eq!(senders, vec!["You", "assistant"]);

    orchestrator.dispose();
    graph.dispose();
    assert!(audio.is_disposed());
    assert!(faces.is_disposed());
}

#[test]
fn silence_never_reaches_the_agent() {
    let config = config();
    let audio = StreamSource::<AudioChunk>::new("microphone");
    let faces = StreamSource::<FaceObservation>::new("camera");
    let graph = SensorGraph::wire(&audio, &faces, backends(), &config).unwrap();
    let transcript = Transcript::default();
    let agent = RecordingAgent::new();
    let _orchestrator = graph
        .orchestrator(&transcript, agent.clone(), Arc::new(ConsoleSink::new()), &config)
        .unwrap();

    for _ in 0..3 {
        faces.emit(engaged_face());
    }
    for _ in 0..6 {
        audio.emit(AudioChunk {
            samples: vec![0.0; 50],
            sample_rate: 100,
        });
        sleep(Duration::from_millis(10));
    }

    sleep(Duration::from_millis(100));
    assert!(agent.prompts().is_empty());
    assert!(!audio.is_paused());
    graph.dispose();
}

#[test]
fn failed_cycle_resumes_the_microphone() {
    let config = config();
    let audio = StreamSource::<AudioChunk>::new("microphone");
    let faces = StreamSource::<FaceObservation>::new("camera");
    let graph = SensorGraph::wire(&audio, &faces, backends(), &config).unwrap();
    let transcript = Transcript::default();
    let sink = Arc::new(ConsoleSink::new());
    let _resume = graph.resume_audio_on(sink.speech_ended());
    let orchestrator = graph
        .orchestrator(&transcript, Arc::new(FailingAgent), sink.clone(), &config)
        .unwrap();

    graph.segments().emit(utterance());

    assert!(wait_for(Duration::from_secs(2), || !audio.is_paused()));
    let texts: Vec<String> = transcript.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(
        texts,
        vec!["What time is it?".to_owned(), config.cycle.failure_message.clone()]
    );
    // The next utterance opens a fresh cycle.
    assert_eq!(orchestrator.cycle(), 1);
    assert!(audio.emit(loud_chunk()));
    graph.dispose();
}

#[test]
fn blank_transcription_resumes_the_microphone() {
    let config = config();
    let audio = StreamSource::<AudioChunk>::new("microphone");
    let faces = StreamSource::<FaceObservation>::new("camera");
    let graph =
        SensorGraph::wire(&audio, &faces, backends_with("   ", Box::new(CalmVoice)), &config)
            .unwrap();
    let transcript = Transcript::default();
    let agent = RecordingAgent::new();
    let sink = Arc::new(ConsoleSink::new());
    let _resume = graph.resume_audio_on(sink.speech_ended());
    let _orchestrator = graph
        .orchestrator(&transcript, agent.clone(), sink.clone(), &config)
        .unwrap();

    graph.segments().emit(utterance());

    assert!(wait_for(Duration::from_secs(2), || !audio.is_paused()));
    assert!(agent.prompts().is_empty());
    assert!(transcript.messages().is_empty());
    graph.dispose();
}

#[test]
fn unclassified_voice_still_releases_the_awaiting_cycle() {
    let config = config();
    let audio = StreamSource::<AudioChunk>::new("microphone");
    let faces = StreamSource::<FaceObservation>::new("camera");
    let graph = SensorGraph::wire(
        &audio,
        &faces,
        backends_with("Are you there?", Box::new(DeafVoice)),
        &config,
    )
    .unwrap();
    let transcript = Transcript::default();
    let agent = RecordingAgent::new();
    let sink = Arc::new(ConsoleSink::new());
    let _resume = graph.resume_audio_on(sink.speech_ended());
    let _orchestrator = graph
        .orchestrator(&transcript, agent.clone(), sink.clone(), &config)
        .unwrap();

    graph.segments().emit(utterance());

    assert!(wait_for(Duration::from_secs(2), || !agent.prompts().is_empty()));
    let prompt = agent.prompts().remove(0);
    assert_eq!(prompt.get("question"), Some("Are you there?"));
    assert_eq!(prompt.get("speech_emotions"), Some(NO_SPEECH_EMOTION));
    assert!(wait_for(Duration::from_secs(1), || !audio.is_paused()));
    graph.dispose();
}

//! Cycle fusion over emotion context streams driven by hand.

use crate::helpers::{FailingAgent, RecordingAgent, RecordingSink};
use consens::agent::{AgentAnswer, ChatAgent, Prompt};
use consens::config::{AnimationConfig, CycleConfig};
use consens::pipeline::completion::AwaitSource;
use consens::pipeline::coordinator::{CycleState, FusionOrchestrator};
use consens::pipeline::messages::EmotionScores;
use consens::prompt::emotion::{NO_FACIAL_EXPRESSION, NO_SPEECH_EMOTION};
use consens::prompt::{AnimationCatalogue, EmotionPromptBuilder};
use consens::stream::StreamSource;
use consens::transcript::Transcript;
use std::sync::Arc;

struct Rig {
    questions: StreamSource<String>,
    faces: StreamSource<EmotionScores>,
    voice: StreamSource<EmotionScores>,
    transcript: Transcript,
    agent: Arc<RecordingAgent>,
    sink: Arc<RecordingSink>,
}

impl Rig {
    fn new() -> Self {
        Self {
            questions: StreamSource::new("questions"),
            faces: StreamSource::new("facial-expression"),
            voice: StreamSource::new("speech-emotion"),
            transcript: Transcript::default(),
            agent: RecordingAgent::new(),
            sink: RecordingSink::new(),
        }
    }

    fn prompt_builder(&self) -> EmotionPromptBuilder {
        EmotionPromptBuilder::new(0.5)
            .facial_expressions(&self.faces)
            .speech_emotions(&self.voice)
    }

    fn orchestrator(&self) -> FusionOrchestrator {
        self.builder().build().unwrap()
    }

    fn builder(&self) -> consens::pipeline::coordinator::FusionOrchestratorBuilder {
        FusionOrchestrator::builder(
            &self.questions,
            &self.transcript,
            self.agent.clone(),
            self.sink.clone(),
        )
        .auxiliary(&self.faces)
        .auxiliary(&self.voice)
        .prompt_builder(self.prompt_builder())
    }
}

fn scores(pairs: &[(&str, f32)]) -> EmotionScores {
    pairs.iter().map(|(l, s)| (*l, *s)).collect()
}

#[test]
fn context_gathered_before_the_question_shapes_the_prompt() {
    let rig = Rig::new();
    let orchestrator = rig.orchestrator();

    rig.faces.emit(scores(&[("happy", 0.9), ("sad", 0.1)]));
    rig.faces.emit(scores(&[("happy", 0.9)]));
    rig.voice.emit(scores(&[("sad", 0.6)]));
    assert_eq!(orchestrator.pending_events(), 3);

    rig.questions.emit("How are you?".to_owned());

    let prompts = rig.agent.prompts();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    assert_eq!(prompt.get("question"), Some("How are you?"));
    assert_eq!(prompt.get("facial_expressions"), Some("Looks (very likely) happy."));
    assert_eq!(prompt.get("speech_emotions"), Some("Sounds (possibly) sad."));

    let transcript: Vec<String> = rig
        .transcript
        .messages()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        transcript,
        vec!["You: How are you?", "assistant: answer to How are you?"]
    );
    assert_eq!(rig.sink.answers().len(), 1);
    assert_eq!(orchestrator.cycle(), 1);
    assert_eq!(orchestrator.pending_events(), 0);
    assert_eq!(orchestrator.state(), CycleState::Accumulating);
}

#[test]
fn context_does_not_leak_into_the_next_cycle() {
    let rig = Rig::new();
    let _orchestrator = rig.orchestrator();

    rig.faces.emit(scores(&[("angry", 0.8)]));
    rig.questions.emit("first".to_owned());
    rig.questions.emit("second".to_owned());

    let prompts = rig.agent.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0].get("facial_expressions"), Some("Looks (likely) angry."));
    assert_eq!(prompts[1].get("facial_expressions"), Some(NO_FACIAL_EXPRESSION));
    assert_eq!(prompts[1].get("speech_emotions"), Some(NO_SPEECH_EMOTION));
}

#[test]
fn awaited_source_holds_the_cycle_open() {
    let rig = Rig::new();
    let orchestrator = rig
        .builder()
        .completion(AwaitSource::new(rig.voice.id()))
        .build()
        .unwrap();

    rig.questions.emit("Are you listening?".to_owned());
    assert!(rig.agent.prompts().is_empty());
    assert_eq!(
        orchestrator.pending_question().as_deref(),
        Some("Are you listening?")
    );

    rig.voice.emit(scores(&[("neutral", 0.99)]));
    let prompts = rig.agent.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].get("speech_emotions"), Some("Sounds (certainly) neutral."));
    assert!(orchestrator.pending_question().is_none());
}

#[test]
fn newer_question_replaces_an_undispatched_one() {
    let rig = Rig::new();
    let _orchestrator = rig
        .builder()
        .completion(AwaitSource::new(rig.voice.id()))
        .build()
        .unwrap();

    rig.questions.emit("draft".to_owned());
    rig.questions.emit("final".to_owned());
    rig.voice.emit(scores(&[("happy", 0.7)]));

    assert_eq!(rig.agent.questions(), vec!["final"]);
}

#[test]
fn agent_failure_posts_the_configured_notice_and_recovers() {
    let rig = Rig::new();
    let config = CycleConfig {
        failure_message: "Please ask again.".to_owned(),
        system_sender: "robot".to_owned(),
        ..CycleConfig::default()
    };
    let orchestrator = FusionOrchestrator::builder(
        &rig.questions,
        &rig.transcript,
        Arc::new(FailingAgent),
        rig.sink.clone(),
    )
    .config(config)
    .build()
    .unwrap();

    rig.questions.emit("anyone there?".to_owned());
    rig.questions.emit("hello?".to_owned());

    let notices: Vec<String> = rig
        .transcript
        .messages()
        .into_iter()
        .filter(|m| m.sender == "robot")
        .map(|m| m.text)
        .collect();
    assert_eq!(notices, vec!["Please ask again.", "Please ask again."]);
    assert!(rig.sink.answers().is_empty());
    assert_eq!(orchestrator.cycle(), 2);
    assert_eq!(orchestrator.state(), CycleState::Accumulating);
}

struct DirectiveAgent;

impl ChatAgent for DirectiveAgent {
    fn prompt(&self, _prompt: &Prompt) -> anyhow::Result<AgentAnswer> {
        Ok(AgentAnswer {
            answer: "Hello! ^start(Hey_1) Nice to meet you.".to_owned(),
            clean_answer: Some("Hello! Nice to meet you.".to_owned()),
        })
    }
}

#[test]
fn sink_receives_resolved_animations_while_transcript_stays_clean() {
    let rig = Rig::new();
    let catalogue = AnimationCatalogue::new(vec![AnimationConfig {
        name: "Hey_1".to_owned(),
        path: "animations/Stand/Gestures/Hey_1".to_owned(),
        labels: "hello, wave".to_owned(),
    }]);
    let _orchestrator = FusionOrchestrator::builder(
        &rig.questions,
        &rig.transcript,
        Arc::new(DirectiveAgent),
        rig.sink.clone(),
    )
    .prompt_builder(rig.prompt_builder().animations(catalogue))
    .build()
    .unwrap();

    rig.questions.emit("Hi robot".to_owned());

    let answers = rig.sink.answers();
    assert_eq!(answers.len(), 1);
    assert_eq!(
        answers[0].answer,
        "Hello! ^start(animations/Stand/Gestures/Hey_1) Nice to meet you."
    );
    let last = rig.transcript.messages().pop().unwrap();
    assert_eq!(last.text, "Hello! Nice to meet you.");
    assert!(!last.from_chat);
}

#[test]
fn disposing_stops_cycles_and_inputs() {
    let rig = Rig::new();
    let orchestrator = rig.orchestrator();

    orchestrator.dispose();
    assert!(rig.questions.is_disposed());
    assert!(rig.faces.is_disposed());
    assert!(rig.voice.is_disposed());
    assert!(rig.transcript.is_stopped());

    assert!(!rig.questions.emit("too late".to_owned()));
    assert!(rig.agent.prompts().is_empty());
}

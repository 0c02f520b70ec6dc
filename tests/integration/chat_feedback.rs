//! Chat surface feedback: typed messages become questions, answers come
//! back through the transcript.

use crate::helpers::{RecordingAgent, RecordingSink, wait_for};
use consens::agent::{AgentAnswer, ChatAgent, Prompt};
use consens::host::{Outbound, StdioBridge, run_bridge};
use consens::pipeline::coordinator::FusionOrchestrator;
use consens::stream::StreamSource;
use consens::transcript::{Message, Transcript, TranscriptSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Default)]
struct Screen {
    lines: Mutex<Vec<String>>,
}

impl TranscriptSink for Screen {
    fn show(&self, message: &Message) -> anyhow::Result<()> {
        self.lines.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[test]
fn typed_message_is_answered_without_echo() {
    let questions = StreamSource::<String>::new("questions");
    let transcript = Transcript::default();
    let agent = RecordingAgent::new();
    let screen = Arc::new(Screen::default());
    let _display = transcript.attach_display(screen.clone());
    let _orchestrator =
        FusionOrchestrator::builder(&questions, &transcript, agent.clone(), RecordingSink::new())
            .build()
            .unwrap();

    transcript.post("What is your name?", "Ada", true);

    assert_eq!(agent.questions(), vec!["What is your name?"]);
    assert_eq!(
        *screen.lines.lock().unwrap(),
        vec![
            "Ada: What is your name?",
            "assistant: answer to What is your name?"
        ]
    );
}

#[test]
fn spoken_and_typed_questions_share_one_cycle_counter() {
    let questions = StreamSource::<String>::new("questions");
    let transcript = Transcript::default();
    let agent = RecordingAgent::new();
    let orchestrator =
        FusionOrchestrator::builder(&questions, &transcript, agent.clone(), RecordingSink::new())
            .build()
            .unwrap();

    questions.emit("spoken".to_owned());
    transcript.post("typed", "You", true);
    transcript.post("not a question", "assistant", false);

    assert_eq!(agent.questions(), vec!["spoken", "typed"]);
    assert_eq!(orchestrator.cycle(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stdio_bridge_round_trips_through_the_agent() {
    let questions = StreamSource::<String>::new("questions");
    let transcript = Transcript::default();
    let agent = RecordingAgent::new();
    let orchestrator =
        FusionOrchestrator::builder(&questions, &transcript, agent.clone(), RecordingSink::new())
            .build()
            .unwrap();

    let input = "{\"text\":\"ping\"}\n{\"text\":\"pong\",\"sender\":\"Ada\"}\n";
    let out = run_bridge(
        BufReader::new(input.as_bytes()),
        Vec::new(),
        transcript.clone(),
        "You".to_owned(),
    )
    .await
    .unwrap();
    orchestrator.dispose();

    let lines: Vec<String> = std::str::from_utf8(&out)
        .unwrap()
        .lines()
        .map(|l| match serde_json::from_str::<Outbound>(l).unwrap() {
            Outbound::Message(m) => m.to_string(),
            Outbound::Error { message } => format!("error: {message}"),
        })
        .collect();
    assert_eq!(
        lines,
        vec![
            "You: ping",
            "assistant: answer to ping",
            "Ada: pong",
            "assistant: answer to pong",
        ]
    );
    assert_eq!(agent.questions(), vec!["ping", "pong"]);
}

/// Agent that holds every answer until released.
#[derive(Default)]
struct HeldAgent {
    released: AtomicBool,
}

impl ChatAgent for HeldAgent {
    fn prompt(&self, prompt: &Prompt) -> anyhow::Result<AgentAnswer> {
        anyhow::ensure!(
            wait_for(Duration::from_secs(5), || self.released.load(Ordering::SeqCst)),
            "never released"
        );
        let question = prompt.get("question").unwrap_or_default();
        Ok(AgentAnswer::new(format!("answer to {question}")))
    }
}

fn shown(line: &str) -> String {
    match serde_json::from_str::<Outbound>(line).unwrap() {
        Outbound::Message(m) => m.to_string(),
        Outbound::Error { message } => format!("error: {message}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridge_attached_first_echoes_the_typed_line_while_the_agent_thinks() {
    let questions = StreamSource::<String>::new("questions");
    let transcript = Transcript::default();
    let bridge = StdioBridge::attach(&transcript);
    let agent = Arc::new(HeldAgent::default());
    let orchestrator =
        FusionOrchestrator::builder(&questions, &transcript, agent.clone(), RecordingSink::new())
            .build()
            .unwrap();

    let (writer, shell) = tokio::io::duplex(4096);
    let running = tokio::spawn(bridge.run(
        BufReader::new("{\"text\":\"ping\"}\n".as_bytes()),
        writer,
        "You".to_owned(),
    ));
    let mut lines = BufReader::new(shell).lines();

    // Written while the agent is still holding its answer.
    let first = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("typed line not echoed before the answer")
        .unwrap()
        .unwrap();
    assert_eq!(shown(&first), "You: ping");

    agent.released.store(true, Ordering::SeqCst);
    let second = lines.next_line().await.unwrap().unwrap();
    assert_eq!(shown(&second), "assistant: answer to ping");

    running.await.unwrap().unwrap();
    orchestrator.dispose();
}

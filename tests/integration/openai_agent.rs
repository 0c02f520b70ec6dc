//! OpenAI-compatible agent against a mock server.

use consens::agent::{AgentAnswer, ChatAgent, OpenAiChatAgent, Prompt};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1234567890,
        "model": "gpt-test",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn agent(server: &MockServer) -> OpenAiChatAgent {
    OpenAiChatAgent::new(
        format!("{}/v1", server.uri()),
        "test-key".to_owned(),
        "gpt-test".to_owned(),
    )
    .with_system_prompt("Face: {facial_expressions}")
}

/// The agent blocks on HTTP, so it runs on the blocking pool.
async fn ask(
    agent: OpenAiChatAgent,
    prompt: Prompt,
) -> (OpenAiChatAgent, anyhow::Result<AgentAnswer>) {
    tokio::task::spawn_blocking(move || {
        let answer = agent.prompt(&prompt);
        (agent, answer)
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_carries_rendered_system_prompt_and_question() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "messages": [
                {"role": "system", "content": "Face: Looks (likely) sad."},
                {"role": "user", "content": "Is everything fine?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "I am here for you. ^start(Hey_1)\nWant to talk?",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let prompt = Prompt::new()
        .with("question", "Is everything fine?")
        .with("facial_expressions", "Looks (likely) sad.");
    let (_, answer) = ask(agent(&server), prompt).await;
    let answer = answer.unwrap();

    assert_eq!(answer.answer, "I am here for you. ^start(Hey_1) Want to talk?");
    assert!(!answer.display_text().contains('^'));
    assert!(answer.display_text().contains("Want to talk?"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn previous_turns_are_replayed_as_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Noted.")))
        .expect(2)
        .mount(&server)
        .await;

    let agent = agent(&server);
    let (agent, first) = ask(agent, Prompt::new().with("question", "My name is Ada.")).await;
    first.unwrap();
    let (_, second) = ask(agent, Prompt::new().with("question", "What is my name?")).await;
    second.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let contents: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .skip(1)
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["My name is Ada.", "Noted.", "What is my name?"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_surface_as_agent_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let (_, answer) = ask(agent(&server), Prompt::new().with("question", "hello")).await;
    let err = answer.unwrap_err();
    assert!(err.to_string().contains("HTTP request failed"), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_without_content_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let (_, answer) = ask(agent(&server), Prompt::new().with("question", "hello")).await;
    assert!(answer.is_err());
}

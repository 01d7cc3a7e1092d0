// Integration tests for text mode against a mock generateContent endpoint

use parlez::chat::ChatSession;
use parlez::config::{AppConfig, InteractionMode, ProficiencyLevel, ServiceConfig};
use parlez::error::TutorError;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

fn service(server: &MockServer) -> ServiceConfig {
    ServiceConfig {
        api_key: "test-key".into(),
        rest_url: format!("{}/v1beta", server.uri()),
        ..ServiceConfig::default()
    }
}

fn learner() -> AppConfig {
    AppConfig {
        level: ProficiencyLevel::B1,
        words: vec!["boulangerie".into()],
        topic: Some("Shopping".into()),
        mode: InteractionMode::Text,
    }
}

fn reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    }))
}

#[tokio::test]
async fn test_history_is_resent_each_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .and(query_param("key", "test-key"))
        .respond_with(reply("Bonjour ! Tu vas à la boulangerie ?"))
        .mount(&server)
        .await;

    let mut chat = ChatSession::new(&service(&server), &learner());

    let first = chat.send("Salut").await.unwrap();
    assert_eq!(first, "Bonjour ! Tu vas à la boulangerie ?");
    chat.send("Oui, j'achète du pain").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let contents = second["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["role"], "user");
    assert_eq!(contents[0]["parts"][0]["text"], "Salut");
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[2]["parts"][0]["text"], "Oui, j'achète du pain");

    let instruction = second["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
    assert!(instruction.contains("B1"));
    assert!(instruction.contains("boulangerie"));
    assert!(instruction.contains("Shopping"));

    assert_eq!(chat.history().len(), 4);
}

#[tokio::test]
async fn test_failed_turn_keeps_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "API key not valid" }
        })))
        .mount(&server)
        .await;

    let mut chat = ChatSession::new(&service(&server), &learner());
    let err = chat.send("Salut").await.unwrap_err();

    match err {
        TutorError::Chat(msg) => {
            assert!(msg.contains("400"));
            assert!(msg.contains("API key not valid"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_empty_candidates_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let mut chat = ChatSession::new(&service(&server), &learner());

    assert!(matches!(chat.send("Salut").await, Err(TutorError::Chat(_))));
    assert!(chat.history().is_empty());
}

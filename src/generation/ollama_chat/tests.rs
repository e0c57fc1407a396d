use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn configs_for(server: &MockServer) -> (OllamaConfig, GenerationConfig) {
    let ollama = OllamaConfig {
        protocol: "http".to_string(),
        host: server.address().ip().to_string(),
        port: server.address().port(),
        retry_attempts: 1,
        ..OllamaConfig::default()
    };
    let generation = GenerationConfig {
        model: "test-chat".to_string(),
        temperature: 0.2,
        ..GenerationConfig::default()
    };
    (ollama, generation)
}

#[test]
fn uses_generation_model() {
    let chat = OllamaChat::new(&OllamaConfig::default(), &GenerationConfig::default())
        .expect("should build chat model");

    assert_eq!(chat.model(), "llama3.1:8b");
}

#[tokio::test]
async fn sends_system_and_user_turns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "test-chat",
            "stream": false,
            "messages": [
                {"role": "system", "content": "be precise"},
                {"role": "user", "content": "What is the deposit?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-chat",
            "message": {"role": "assistant", "content": "Two months of rent."},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (ollama, generation) = configs_for(&server);
    let chat = OllamaChat::new(&ollama, &generation).expect("should build chat model");

    let answer = chat
        .complete(&ChatRequest {
            system: "be precise".to_string(),
            user: "What is the deposit?".to_string(),
            temperature: 0.2,
        })
        .await
        .expect("should complete");

    assert_eq!(answer, "Two months of rent.");
}

#[tokio::test]
async fn server_failure_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (ollama, generation) = configs_for(&server);
    let chat = OllamaChat::new(&ollama, &generation).expect("should build chat model");

    let result = chat
        .complete(&ChatRequest {
            system: String::new(),
            user: "hello".to_string(),
            temperature: 0.0,
        })
        .await;

    assert!(matches!(result, Err(RagError::Network(_))));
}

// Shared helpers for integration tests

#![allow(dead_code, reason = "each test crate uses a subset of the helpers")]

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use docqa::config::{Config, OllamaConfig};

pub const DIM: usize = 64;

/// Bag-of-words vector: every lowercase word adds weight to a hashed bucket, then the
/// vector is normalised. Texts sharing words end up close together.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; DIM];
    vector[0] = 0.1;

    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
            });
        vector[1 + (hash as usize) % (DIM - 1)] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    vector.iter_mut().for_each(|v| *v /= norm);
    vector
}

/// Config rooted at `base_dir` that talks to `server`
pub fn config_for(server: &MockServer, base_dir: &std::path::Path) -> Config {
    Config {
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: server.address().ip().to_string(),
            port: server.address().port(),
            model: "test-embed".to_string(),
            batch_size: 8,
            embedding_dimension: DIM as u32,
            retry_attempts: 1,
            timeout_seconds: 5,
            ..OllamaConfig::default()
        },
        base_dir: base_dir.to_path_buf(),
        ..Config::default()
    }
}

/// Answer `/api/embed` with [`embed_text`] vectors for every input
pub async fn mount_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(|request: &Request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            let embeddings: Vec<Vec<f32>> = body["input"]
                .as_array()
                .map(|inputs| {
                    inputs
                        .iter()
                        .map(|input| embed_text(input.as_str().unwrap_or_default()))
                        .collect()
                })
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
        })
        .mount(server)
        .await;
}

/// Answer `/api/chat` with a fixed assistant message
pub async fn mount_chat(server: &MockServer, reply: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.1:8b",
            "message": { "role": "assistant", "content": reply },
            "done": true
        })))
        .mount(server)
        .await;
}

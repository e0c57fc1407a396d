#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use docqa::config::{GenerationConfig, OllamaConfig};
use docqa::embeddings::{ChunkingConfig, chunk_text};
use docqa::ollama::{ChatMessage, OllamaClient};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

const TEST_MODEL: &str = "nomic-embed-text:latest";
const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

fn test_config() -> OllamaConfig {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
    let port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_OLLAMA_PORT);
    let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string());

    OllamaConfig {
        host,
        port,
        model,
        batch_size: 5,
        ..OllamaConfig::default()
    }
}

fn create_integration_test_client() -> OllamaClient {
    OllamaClient::new(&test_config())
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(3)
}

fn create_chat_test_client() -> OllamaClient {
    let model = env::var("OLLAMA_CHAT_MODEL").unwrap_or_else(|_| GenerationConfig::default().model);
    create_integration_test_client()
        .with_model(model)
        .with_timeout(Duration::from_secs(120))
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b)
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = create_integration_test_client();

    info!("Testing health check against real Ollama instance");
    let result = client.health_check();

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_embedding_model_is_installed() {
    init_test_tracing();

    let client = create_integration_test_client();
    let models = client.list_models().expect("Should list models");
    debug!("Available models: {:?}", models.iter().map(|m| &m.name).collect::<Vec<_>>());

    client
        .validate_model()
        .expect("Embedding model should be installed; run `ollama pull nomic-embed-text`");
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_embedding_dimension_matches_default() {
    init_test_tracing();

    let client = create_integration_test_client();
    let embedding = client
        .generate_embedding("The tenant shall pay rent monthly.")
        .expect("Should generate embedding");

    info!("Generated embedding with {} dimensions", embedding.len());
    assert_eq!(
        embedding.len(),
        OllamaConfig::default().embedding_dimension as usize
    );
    assert!(embedding.iter().all(|v| v.is_finite()));
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_related_texts_are_closer() {
    init_test_tracing();

    let client = create_integration_test_client();
    let texts = vec![
        "The tenant shall pay rent on the first day of each month.".to_string(),
        "Monthly rent is due from the lessee at the start of the month.".to_string(),
        "The recipe calls for two cups of flour and an egg.".to_string(),
    ];

    let embeddings = client
        .generate_embeddings_batch(&texts)
        .expect("Should generate batch embeddings");
    assert_eq!(embeddings.len(), texts.len());

    let related = cosine(&embeddings[0], &embeddings[1]);
    let unrelated = cosine(&embeddings[0], &embeddings[2]);
    info!("related: {:.3}, unrelated: {:.3}", related, unrelated);

    assert!(related > unrelated);
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_chunk_embeddings() {
    init_test_tracing();

    let client = create_integration_test_client();
    let text = "Section 1. Definitions.\n\n".to_string()
        + &"The Landlord leases the Premises to the Tenant for the Term. ".repeat(40)
        + "\n\nSection 2. Rent.\n\n"
        + &"Rent is payable in advance without deduction or set-off. ".repeat(40);

    let chunks = chunk_text(&text, &ChunkingConfig::default()).expect("Should chunk text");
    assert!(chunks.len() > 1);

    let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let embeddings = client
        .generate_embeddings_batch(&contents)
        .expect("Should embed every chunk");

    assert_eq!(embeddings.len(), chunks.len());
}

#[test]
#[ignore = "requires a local Ollama instance with a chat model"]
fn real_ollama_chat_completion() {
    init_test_tracing();

    let client = create_chat_test_client();
    let messages = vec![
        ChatMessage::system("Answer with a single word."),
        ChatMessage::user("What colour is a clear daytime sky?"),
    ];

    let reply = client.chat(&messages, 0.0).expect("Should get chat reply");
    info!("Chat reply: {}", reply);

    assert!(!reply.trim().is_empty());
}

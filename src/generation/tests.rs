use super::testing::{FailingChat, ScriptedChat, SlowChat};
use super::*;
use crate::database::lancedb::ChunkMetadata;

fn chunk(document: i64, index: u32, text: &str) -> RetrievedChunk {
    RetrievedChunk {
        text: text.to_string(),
        metadata: ChunkMetadata::new(3, document, index),
        similarity_score: 0.9,
    }
}

fn generator(model: Arc<dyn ChatModel>) -> AnswerGenerator {
    AnswerGenerator::new(model, &GenerationConfig::default())
}

#[test]
fn format_context_joins_with_separator() {
    let chunks = vec![
        chunk(7, 0, "The lease term is twelve months."),
        chunk(7, 1, "Rent is 1000 per month."),
    ];

    assert_eq!(
        AnswerGenerator::format_context(&chunks),
        "The lease term is twelve months.\n\n---\n\nRent is 1000 per month."
    );
    assert_eq!(
        AnswerGenerator::format_context(&chunks[..1]),
        "The lease term is twelve months."
    );
}

#[test]
fn format_context_without_chunks() {
    assert_eq!(AnswerGenerator::format_context(&[]), NO_CONTEXT);
}

#[test]
fn refusal_mentions_domain() {
    let generator = generator(Arc::new(ScriptedChat::new("ok")));

    assert_eq!(generator.domain(), "legal");
    assert_eq!(
        generator.refusal_message(),
        "I'm designed to answer legal questions or assist with legal documents. \
         Please ask something related to legal."
    );

    let medical = AnswerGenerator::new(
        Arc::new(ScriptedChat::new("ok")),
        &GenerationConfig {
            domain: "medical".to_string(),
            ..GenerationConfig::default()
        },
    );
    assert!(medical.refusal_message().contains("answer medical questions"));
}

#[test]
fn system_prompt_carries_fixed_replies() {
    let generator = generator(Arc::new(ScriptedChat::new("ok")));
    let prompt = generator.system_prompt();

    assert!(prompt.contains(&generator.refusal_message()));
    assert!(prompt.contains(INSUFFICIENT_CONTEXT_ANSWER));
    assert!(prompt.contains("Never fabricate"));
}

#[test]
fn request_contains_context_and_question() {
    let generator = generator(Arc::new(ScriptedChat::new("ok")));
    let request = generator.build_request("How long is the lease?", &[chunk(7, 0, "Twelve months.")]);

    assert_eq!(
        request.user,
        "Context:\nTwelve months.\n\nQuestion: How long is the lease?\n\nAnswer:"
    );
    assert!((request.temperature - 0.1).abs() < f32::EPSILON);
}

#[tokio::test]
async fn generate_returns_trimmed_model_answer() {
    let model = Arc::new(ScriptedChat::new("  The lease lasts twelve months.\n"));
    let generator = generator(model.clone());

    let answer = generator
        .generate("How long is the lease?", &[chunk(7, 0, "Twelve months.")])
        .await;

    assert_eq!(answer, "The lease lasts twelve months.");
    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].user.contains("Twelve months."));
}

#[tokio::test]
async fn empty_context_is_still_sent() {
    let model = Arc::new(ScriptedChat::new(INSUFFICIENT_CONTEXT_ANSWER));
    let generator = generator(model.clone());

    let answer = generator.generate("What is the rent?", &[]).await;

    assert_eq!(answer, INSUFFICIENT_CONTEXT_ANSWER);
    assert!(model.requests()[0].user.contains(NO_CONTEXT));
}

#[tokio::test]
async fn provider_failure_degrades_to_apology() {
    let generator = generator(Arc::new(FailingChat));

    let result = generator.try_generate("question", &[]).await;
    assert!(matches!(result, Err(RagError::Network(_))));

    assert_eq!(generator.generate("question", &[]).await, ERROR_ANSWER);
}

#[tokio::test]
async fn empty_answer_is_an_error() {
    let generator = generator(Arc::new(ScriptedChat::new("   ")));

    let result = generator.try_generate("question", &[]).await;

    assert!(matches!(result, Err(RagError::Generation(_))));
    assert_eq!(generator.generate("question", &[]).await, ERROR_ANSWER);
}

#[tokio::test]
async fn timeout_degrades_to_apology() {
    let generator = generator(Arc::new(SlowChat {
        delay: Duration::from_secs(5),
    }))
    .with_timeout(Duration::from_millis(50));

    let result = generator.try_generate("question", &[]).await;
    assert!(matches!(result, Err(RagError::Generation(_))));

    assert_eq!(generator.generate("question", &[]).await, ERROR_ANSWER);
}

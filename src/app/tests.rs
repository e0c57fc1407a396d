use super::*;
use crate::embeddings::testing::HashEmbedder;
use crate::generation::testing::ScriptedChat;
use crate::generation::ERROR_ANSWER;
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 64;

async fn create_test_app(reply: &str) -> (TempDir, App, Arc<ScriptedChat>) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.ollama.embedding_dimension = DIM as u32;

    let chat = Arc::new(ScriptedChat::new(reply));
    let app = App::with_components(config, Arc::new(HashEmbedder::new(DIM)), chat.clone())
        .await
        .expect("should build app");

    (temp_dir, app, chat)
}

async fn wait_for_status(app: &App, document_id: i64, status: IndexStatus) -> Document {
    for _ in 0..200 {
        let document = app
            .database()
            .get_document(document_id)
            .await
            .expect("should query document")
            .expect("document should exist");
        if document.index_status == status {
            return document;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("document {} never reached status {}", document_id, status);
}

#[tokio::test]
async fn mismatched_embedding_dimension_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };

    let result = App::with_components(
        config,
        Arc::new(HashEmbedder::new(DIM)),
        Arc::new(ScriptedChat::new("unused")),
    )
    .await;

    assert!(matches!(result, Err(RagError::Config(_))));
}

#[tokio::test]
async fn upload_then_ask() {
    let (_temp_dir, app, chat) = create_test_app("Alpha, Beta and Gamma.").await;

    let document = app
        .upload_document(3, "notes.txt", b"Alpha. Beta. Gamma.".to_vec())
        .await
        .expect("should upload");
    assert_eq!(document.owner_user_id, 3);
    assert_eq!(document.content_type, "text");

    let indexed = wait_for_status(&app, document.id, IndexStatus::Indexed).await;
    assert_eq!(indexed.chunk_count, 1);

    let session = app
        .create_session(3, None, vec![document.id])
        .await
        .expect("should create session");
    assert_eq!(session.session.session_name, "New Chat");

    let answer = app
        .ask("What is mentioned?", 3, session.session.id)
        .await
        .expect("should answer");

    assert_eq!(answer.answer, "Alpha, Beta and Gamma.");
    assert_eq!(answer.context.len(), 1);
    assert_eq!(answer.context[0].metadata.document_id, document.id);
    assert!(chat.requests()[0].user.contains("Alpha. Beta. Gamma."));

    let history = app
        .chat_history(3, session.session.id)
        .await
        .expect("should load history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "What is mentioned?");
    assert_eq!(history[0].response, "Alpha, Beta and Gamma.");

    let stats = app.shutdown().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn unsupported_upload_stores_nothing() {
    let (_temp_dir, app, _chat) = create_test_app("unused").await;

    let result = app
        .upload_document(3, "archive.zip", vec![0x50, 0x4b, 0x03, 0x04])
        .await;

    assert!(matches!(result, Err(RagError::Extraction(_))));
    assert!(
        app.list_documents(3)
            .await
            .expect("should list documents")
            .is_empty()
    );
}

#[tokio::test]
async fn upload_without_text_is_marked_failed() {
    let (_temp_dir, app, _chat) = create_test_app("unused").await;

    let document = app
        .upload_document(3, "blank.txt", b"   \n  ".to_vec())
        .await
        .expect("row should still be created");

    assert_eq!(document.index_status, IndexStatus::Failed);
    assert!(
        document
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("blank.txt"))
    );

    let stats = app.shutdown().await;
    assert_eq!(stats.submitted, 0);
}

#[tokio::test]
async fn malformed_pdf_keeps_a_failed_row() {
    let (_temp_dir, app, _chat) = create_test_app("unused").await;

    let document = app
        .upload_document(
            3,
            "lease.pdf",
            b"%PDF-1.7\n1 0 obj\n<< /Type /Pages /Kids [2 0 R".to_vec(),
        )
        .await
        .expect("a broken file should not fail the upload");

    assert_eq!(document.index_status, IndexStatus::Failed);
    assert_eq!(document.content_type, "pdf");

    let stored = app.list_documents(3).await.expect("should list documents");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, document.id);

    let stats = app.shutdown().await;
    assert_eq!(stats.submitted, 0);
}

#[tokio::test]
async fn delete_removes_row_and_chunks() {
    let (_temp_dir, app, _chat) = create_test_app("unused").await;

    let document = app
        .upload_document(3, "notes.txt", b"Alpha. Beta. Gamma.".to_vec())
        .await
        .expect("should upload");
    wait_for_status(&app, document.id, IndexStatus::Indexed).await;

    assert!(
        !app.delete_document(4, document.id)
            .await
            .expect("should run delete"),
        "another user cannot delete the document"
    );
    assert!(
        app.delete_document(3, document.id)
            .await
            .expect("should delete")
    );

    let vector_store = app.vector_store.clone();
    let stats = app.shutdown().await;
    assert_eq!(stats.completed, 2);
    assert_eq!(
        vector_store.count(None).await.expect("should count chunks"),
        0
    );
}

#[tokio::test]
async fn sessions_are_owner_scoped() {
    let (_temp_dir, app, _chat) = create_test_app("unused").await;

    let document = app
        .upload_document(3, "notes.txt", b"Alpha.".to_vec())
        .await
        .expect("should upload");

    let result = app
        .create_session(4, Some("Theirs".to_string()), vec![document.id])
        .await;
    assert!(matches!(result, Err(RagError::NotFound(_))));
    assert!(
        app.list_sessions(4)
            .await
            .expect("should list sessions")
            .is_empty()
    );

    let session = app
        .create_session(3, Some("Mine".to_string()), vec![document.id])
        .await
        .expect("should create session");

    assert!(matches!(
        app.ask("question", 4, session.session.id).await,
        Err(RagError::NotFound(_))
    ));
    assert!(matches!(
        app.chat_history(4, session.session.id).await,
        Err(RagError::NotFound(_))
    ));

    assert!(
        !app.delete_session(4, session.session.id)
            .await
            .expect("should run delete")
    );
    assert!(
        app.delete_session(3, session.session.id)
            .await
            .expect("should delete")
    );
}

#[tokio::test]
async fn answer_is_stored_even_when_degraded() {
    let (_temp_dir, app, _chat) = create_test_app("   ").await;

    let session = app
        .create_session(3, None, Vec::new())
        .await
        .expect("should create session");

    let answer = app
        .ask("anything", 3, session.session.id)
        .await
        .expect("should answer");
    assert_eq!(answer.answer, ERROR_ANSWER);

    let history = app
        .chat_history(3, session.session.id)
        .await
        .expect("should load history");
    assert_eq!(history[0].response, ERROR_ANSWER);
}

#[tokio::test]
async fn status_counts_documents() {
    let (_temp_dir, app, _chat) = create_test_app("unused").await;

    let document = app
        .upload_document(3, "notes.txt", b"Alpha. Beta. Gamma.".to_vec())
        .await
        .expect("should upload");
    wait_for_status(&app, document.id, IndexStatus::Indexed).await;
    app.upload_document(3, "blank.txt", b" ".to_vec())
        .await
        .expect("should upload");

    let status = app.status().await.expect("should report status");
    assert_eq!(status.indexed, 1);
    assert_eq!(status.failed, 1);
    assert_eq!(status.vector_chunks, 1);
    assert_eq!(status.queue.submitted, 1);
}

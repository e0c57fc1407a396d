use super::*;
use crate::RagError;
use crate::database::lancedb::{MetadataField, Predicate, VectorStore};
use crate::embeddings::testing::HashEmbedder;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const DIM: usize = 16;

fn small_chunks() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 64,
        chunk_overlap: 0,
        prefer_natural_breaks: false,
    }
}

async fn open_store(temp_dir: &TempDir) -> Arc<VectorStore> {
    Arc::new(
        VectorStore::open(&temp_dir.path().join("vectors"), DIM)
            .await
            .expect("should create vector store"),
    )
}

async fn chunks_of(store: &VectorStore, owner: i64, document: i64) -> u64 {
    store
        .count(Some(&ScopeFilter::document(owner, document).to_predicate()))
        .await
        .expect("should count chunks")
}

/// Succeeds on the first call and fails on every later one
struct FlakyEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(RagError::Embedding("connection reset".to_string()));
        }
        self.inner.embed_many(texts).await
    }
}

/// Embeds like [`HashEmbedder`] after a fixed delay
struct SlowEmbedder {
    inner: HashEmbedder,
    delay: std::time::Duration,
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_many(texts).await
    }
}

#[tokio::test]
async fn short_document_becomes_one_chunk() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(HashEmbedder::new(DIM)),
        ChunkingConfig::default(),
        16,
    );

    let stats = pipeline
        .ingest(7, 3, "Alpha. Beta. Gamma.")
        .await
        .expect("should ingest");

    assert_eq!(
        stats,
        IngestionStats {
            chunks: 1,
            batches: 1,
            records_written: 1,
        }
    );
    assert_eq!(chunks_of(&store, 3, 7).await, 1);

    let results = store
        .search(
            &HashEmbedder::new(DIM).vector_for("Alpha. Beta. Gamma."),
            &ScopeFilter::owner(3).to_predicate(),
            4,
        )
        .await
        .expect("should search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "Alpha. Beta. Gamma.");
    assert_eq!(results[0].metadata, ChunkMetadata::new(3, 7, 0));
}

#[tokio::test]
async fn chunks_are_embedded_in_batches() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let pipeline = IngestionPipeline::new(store.clone(), embedder.clone(), small_chunks(), 2);

    let text = (0..5)
        .map(|i| format!("{:<63}\n", format!("section {}", i)))
        .collect::<String>();

    let stats = pipeline.ingest(1, 1, &text).await.expect("should ingest");

    assert_eq!(stats.chunks, 5);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.records_written, 5);
    assert_eq!(embedder.calls(), 3);
    assert_eq!(chunks_of(&store, 1, 1).await, 5);

    for chunk_index in 0..5 {
        let filter = Predicate::and(vec![
            ScopeFilter::document(1, 1).to_predicate(),
            Predicate::eq(MetadataField::ChunkIndex, chunk_index),
        ]);
        assert_eq!(
            store.count(Some(&filter)).await.expect("should count"),
            1,
            "chunk {} should be stored once",
            chunk_index
        );
    }
}

#[tokio::test]
async fn blank_text_is_not_indexed() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let pipeline = IngestionPipeline::new(store.clone(), embedder.clone(), small_chunks(), 2);

    let stats = pipeline.ingest(1, 1, "  \n\t ").await.expect("should succeed");

    assert_eq!(stats, IngestionStats::default());
    assert_eq!(embedder.calls(), 0);
    assert_eq!(store.count(None).await.expect("should count"), 0);
}

#[tokio::test]
async fn reingesting_without_delete_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(HashEmbedder::new(DIM)),
        ChunkingConfig::default(),
        16,
    );

    pipeline
        .ingest(7, 3, "Alpha. Beta. Gamma.")
        .await
        .expect("first ingest should succeed");

    let result = pipeline.ingest(7, 3, "Alpha. Beta. Gamma.").await;
    assert!(matches!(
        result,
        Err(RagError::AlreadyIndexed {
            owner_user_id: 3,
            document_id: 7
        })
    ));
    assert_eq!(chunks_of(&store, 3, 7).await, 1);

    let removed = pipeline
        .delete_document_vectors(7, 3)
        .await
        .expect("should delete");
    assert_eq!(removed, 1);

    pipeline
        .ingest(7, 3, "Alpha. Beta. Gamma. Delta.")
        .await
        .expect("ingest after delete should succeed");
    assert_eq!(chunks_of(&store, 3, 7).await, 1);
}

#[tokio::test]
async fn delete_removes_only_the_document() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(HashEmbedder::new(DIM)),
        small_chunks(),
        4,
    );

    let long_text = "word ".repeat(60);
    pipeline.ingest(1, 1, &long_text).await.expect("should ingest");
    pipeline.ingest(2, 1, &long_text).await.expect("should ingest");
    pipeline.ingest(1, 2, &long_text).await.expect("should ingest");
    let per_document = chunks_of(&store, 1, 1).await;
    assert!(per_document > 1);

    let removed = pipeline
        .delete_document_vectors(1, 1)
        .await
        .expect("should delete");

    assert_eq!(removed, per_document);
    assert_eq!(chunks_of(&store, 1, 1).await, 0);
    assert_eq!(chunks_of(&store, 1, 2).await, per_document);
    assert_eq!(chunks_of(&store, 2, 1).await, per_document);

    let removed_again = pipeline
        .delete_document_vectors(1, 1)
        .await
        .expect("second delete should succeed");
    assert_eq!(removed_again, 0);
}

#[tokio::test]
async fn failed_batch_keeps_earlier_batches() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(FlakyEmbedder {
            inner: HashEmbedder::new(DIM),
            calls: AtomicUsize::new(0),
        }),
        small_chunks(),
        2,
    );

    let text = "x".repeat(64 * 5);
    let result = pipeline.ingest(1, 1, &text).await;

    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert_eq!(chunks_of(&store, 1, 1).await, 2);
}

#[tokio::test]
async fn executes_queue_jobs() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let pipeline = IngestionPipeline::new(
        store.clone(),
        Arc::new(HashEmbedder::new(DIM)),
        ChunkingConfig::default(),
        16,
    );

    let outcome = pipeline
        .execute(&IndexJob::Ingest {
            document_id: 7,
            owner_user_id: 3,
            text: "Alpha. Beta. Gamma.".to_string(),
        })
        .await
        .expect("ingest job should succeed");
    assert!(matches!(outcome, JobOutcome::Ingested(stats) if stats.records_written == 1));

    let outcome = pipeline
        .execute(&IndexJob::DeleteVectors {
            document_id: 7,
            owner_user_id: 3,
        })
        .await
        .expect("delete job should succeed");
    assert_eq!(outcome, JobOutcome::Deleted(1));
}

#[tokio::test]
async fn delete_queued_behind_running_ingest_removes_everything() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        Arc::new(SlowEmbedder {
            inner: HashEmbedder::new(DIM),
            delay: std::time::Duration::from_millis(300),
        }),
        ChunkingConfig::default(),
        8,
    ));
    let handle = spawn_indexer(
        pipeline,
        &crate::config::IndexerConfig {
            max_concurrent_jobs: 2,
            queue_capacity: 8,
        },
    );

    handle
        .ingest(7, 3, "Alpha. Beta. Gamma.".to_string())
        .await
        .expect("should enqueue ingest");
    handle
        .delete_document_vectors(7, 3)
        .await
        .expect("should enqueue delete");
    let stats = handle.shutdown().await;

    assert_eq!(stats.completed, 2);
    assert_eq!(chunks_of(&store, 3, 7).await, 0);
}

// Indexer module
// Document ingestion (chunk -> embed -> upsert) and the background job queue that runs it

#[cfg(test)]
mod tests;

pub mod consistency;
pub mod queue;
pub mod status;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::Result;
use crate::database::lancedb::{ChunkMetadata, EmbeddingRecord, ScopeFilter, VectorIndex};
use crate::embeddings::{ChunkingConfig, EmbeddingProvider, chunk_text};

pub use consistency::{ConsistencyReport, ConsistencyValidator, DocumentScope};
pub use queue::{IndexJob, IndexerHandle, JobExecutor, JobOutcome, QueueStats, spawn_indexer};
pub use status::StatusTrackingExecutor;

/// Counts from one document ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    pub chunks: usize,
    pub batches: usize,
    pub records_written: usize,
}

/// The only writer of embedding records
pub struct IngestionPipeline {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IngestionPipeline {
    #[inline]
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    /// Chunk `text`, embed it batch by batch and store every chunk under
    /// `(owner_user_id, document_id)`.
    ///
    /// Batches are written in chunk order. A failure stops ingestion and leaves the
    /// batches already written in the index.
    #[inline]
    pub async fn ingest(
        &self,
        document_id: i64,
        owner_user_id: i64,
        text: &str,
    ) -> Result<IngestionStats> {
        if text.trim().is_empty() {
            info!(
                "Document {} of user {} has no text, nothing to index",
                document_id, owner_user_id
            );
            return Ok(IngestionStats::default());
        }

        let chunks = chunk_text(text, &self.chunking)?;
        let mut stats = IngestionStats {
            chunks: chunks.len(),
            ..IngestionStats::default()
        };

        info!(
            "Indexing document {} of user {}: {} chunks",
            document_id,
            owner_user_id,
            chunks.len()
        );

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();

            let vectors = self.embedder.embed_many(&texts).await.inspect_err(|e| {
                error!(
                    "Embedding failed for document {} after {} of {} chunks: {}",
                    document_id, stats.records_written, stats.chunks, e
                );
            })?;

            let records = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddingRecord {
                    vector,
                    text: chunk.content.clone(),
                    metadata: ChunkMetadata::new(
                        owner_user_id,
                        document_id,
                        chunk.chunk_index as u32,
                    ),
                })
                .collect();

            let written = self.index.upsert(records).await.inspect_err(|e| {
                error!(
                    "Storing embeddings failed for document {} after {} of {} chunks: {}",
                    document_id, stats.records_written, stats.chunks, e
                );
            })?;

            stats.batches += 1;
            stats.records_written += written;
            debug!(
                "Stored batch {} for document {} ({} of {} chunks)",
                stats.batches, document_id, stats.records_written, stats.chunks
            );
        }

        info!(
            "Indexed document {} of user {} with {} chunks",
            document_id, owner_user_id, stats.records_written
        );
        Ok(stats)
    }

    /// Remove every chunk of the document from the index
    #[inline]
    pub async fn delete_document_vectors(&self, document_id: i64, owner_user_id: i64) -> Result<u64> {
        let scope = ScopeFilter::document(owner_user_id, document_id);
        let removed = self.index.delete(&scope.to_predicate()).await?;

        info!(
            "Removed {} chunks of document {} of user {}",
            removed, document_id, owner_user_id
        );
        Ok(removed)
    }
}

#[async_trait]
impl JobExecutor for IngestionPipeline {
    async fn execute(&self, job: &IndexJob) -> Result<JobOutcome> {
        match job {
            IndexJob::Ingest {
                document_id,
                owner_user_id,
                text,
            } => self
                .ingest(*document_id, *owner_user_id, text)
                .await
                .map(JobOutcome::Ingested),
            IndexJob::DeleteVectors {
                document_id,
                owner_user_id,
            } => self
                .delete_document_vectors(*document_id, *owner_user_id)
                .await
                .map(JobOutcome::Deleted),
        }
    }
}

impl std::fmt::Debug for IngestionPipeline {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("chunking", &self.chunking)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

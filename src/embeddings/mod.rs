// Embeddings module
// Text chunking and the embedding provider seam

pub mod chunking;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::{RagError, Result};

pub use chunking::{ChunkingConfig, TextChunk, chunk_text, split_text};
pub use provider::{LazyEmbeddingProvider, OllamaEmbedder};

/// Turns text into fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input, in input order, and every
/// vector must have `dimension()` components.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("Provider returned no embedding".to_string()))
    }
}

// Owner-scoped retrieval over the vector index


use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::Result;
use crate::database::lancedb::{ChunkMetadata, ScopeFilter, SearchResult, VectorIndex};
use crate::embeddings::EmbeddingProvider;

pub const DEFAULT_TOP_K: usize = 4;

/// A chunk returned for a query, most similar first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub similarity_score: f32,
}

impl From<SearchResult> for RetrievedChunk {
    #[inline]
    fn from(result: SearchResult) -> Self {
        Self {
            text: result.text,
            metadata: result.metadata,
            similarity_score: result.similarity_score,
        }
    }
}

/// Top-K similarity search bound to one owner and optionally a set of documents
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    scope: ScopeFilter,
    k: usize,
}

/// Build a retriever for `owner_user_id`. `None` or an empty slice of document ids
/// searches everything the owner has indexed.
#[inline]
pub fn make_retriever(
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    owner_user_id: i64,
    document_ids: Option<&[i64]>,
    k: usize,
) -> Retriever {
    let scope = ScopeFilter::owner(owner_user_id).with_documents(document_ids.unwrap_or_default());

    Retriever {
        index,
        embedder,
        scope,
        k,
    }
}

impl Retriever {
    #[inline]
    pub fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let query_vector = self.embedder.embed(query).await?;
        let predicate = self.scope.to_predicate();

        let results = self.index.search(&query_vector, &predicate, self.k).await?;

        debug!(
            "Retrieved {} chunks for user {} across {} documents",
            results.len(),
            self.scope.owner_user_id(),
            if self.scope.document_ids().is_empty() {
                "all".to_string()
            } else {
                self.scope.document_ids().len().to_string()
            }
        );

        Ok(results.into_iter().map(RetrievedChunk::from).collect())
    }
}

impl std::fmt::Debug for Retriever {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("scope", &self.scope)
            .field("k", &self.k)
            .finish_non_exhaustive()
    }
}

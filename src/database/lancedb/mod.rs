// LanceDB vector database module
// Handles vector storage and owner-scoped similarity search for document chunks


pub mod filter;
pub mod vector_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use filter::{MetadataField, Predicate, ScopeFilter};
pub use vector_store::VectorStore;

/// Metadata stored alongside every chunk embedding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// User that owns the source document
    pub owner_user_id: i64,
    /// Relational id of the source document
    pub document_id: i64,
    /// Position of the chunk within the document
    pub chunk_index: u32,
    /// Human-readable label, `doc_{document_id}_chunk_{chunk_index}`
    pub source: String,
}

impl ChunkMetadata {
    #[inline]
    pub fn new(owner_user_id: i64, document_id: i64, chunk_index: u32) -> Self {
        Self {
            owner_user_id,
            document_id,
            chunk_index,
            source: source_label(document_id, chunk_index),
        }
    }
}

#[inline]
pub fn source_label(document_id: i64, chunk_index: u32) -> String {
    format!("doc_{}_chunk_{}", document_id, chunk_index)
}

/// A chunk embedding ready to be written to the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A stored chunk returned by similarity search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity, higher is closer
    pub similarity_score: f32,
    pub distance: f32,
}

/// Durable store of chunk embeddings with filtered search and delete.
///
/// Implementations must be safe to share between concurrent readers and writers.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Append records, returning how many were written
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize>;

    /// At most `k` records matching `filter`, most similar first.
    ///
    /// `filter` must constrain `owner_user_id`.
    async fn search(
        &self,
        query_vector: &[f32],
        filter: &Predicate,
        k: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Remove every record matching `filter`, returning how many were removed
    async fn delete(&self, filter: &Predicate) -> Result<u64>;

    async fn count(&self, filter: Option<&Predicate>) -> Result<u64>;
}

// Deterministic embedders for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::EmbeddingProvider;
use crate::{RagError, Result};

/// Bag-of-words embedder: each lowercase word is hashed into a bucket, then the vector is
/// normalised. Texts sharing words land close together.
#[derive(Debug)]
pub(crate) struct HashEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        vector[0] = 0.1;

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = 1 + (fnv1a(&word.to_lowercase()) as usize) % (self.dimension - 1);
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        vector.iter_mut().for_each(|v| *v /= norm);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Embedder whose every call fails, for degraded-path tests
#[derive(Debug)]
pub(crate) struct FailingEmbedder {
    pub(crate) dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("embedding service unavailable".to_string()))
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

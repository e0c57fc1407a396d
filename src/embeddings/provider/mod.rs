
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::EmbeddingProvider;
use crate::config::OllamaConfig;
use crate::ollama::OllamaClient;
use crate::{RagError, Result};

/// Embedding provider backed by an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    dimension: usize,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = OllamaClient::new(config)?;
        Ok(Self::with_client(client, config.embedding_dimension as usize))
    }

    #[inline]
    pub fn with_client(client: OllamaClient, dimension: usize) -> Self {
        Self { client, dimension }
    }

    #[inline]
    pub fn client(&self) -> &OllamaClient {
        &self.client
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.client.clone();
        let inputs = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&inputs))
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::Embedding(format!(
                "Model returned a {}-dimensional vector, expected {}",
                bad.len(),
                self.dimension
            )));
        }

        Ok(vectors)
    }
}

type ProviderFactory = Box<dyn Fn() -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

/// Process-wide embedding handle that builds its provider on first use.
///
/// Concurrent first callers all wait on the same initialisation, so the factory runs at
/// most once on success. A failed initialisation is returned to every waiting caller and
/// retried by the next one.
pub struct LazyEmbeddingProvider {
    cell: OnceCell<Arc<dyn EmbeddingProvider>>,
    factory: ProviderFactory,
    dimension: usize,
}

impl LazyEmbeddingProvider {
    #[inline]
    pub fn new<F>(dimension: usize, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
            dimension,
        }
    }

    /// Lazily build an [`OllamaEmbedder`] from `config`
    #[inline]
    pub fn from_config(config: &OllamaConfig) -> Self {
        let config = config.clone();
        Self::new(config.embedding_dimension as usize, move || {
            info!(
                "Initializing embedding provider {} at {}://{}:{}",
                config.model, config.protocol, config.host, config.port
            );
            let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::new(&config)?);
            Ok(embedder)
        })
    }

    /// The initialised provider, building it if needed
    #[inline]
    pub async fn get(&self) -> Result<&Arc<dyn EmbeddingProvider>> {
        self.cell
            .get_or_try_init(|| async {
                debug!("Embedding provider not yet initialized");
                (self.factory)()
            })
            .await
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

impl std::fmt::Debug for LazyEmbeddingProvider {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEmbeddingProvider")
            .field("dimension", &self.dimension)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EmbeddingProvider for LazyEmbeddingProvider {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.get().await?.embed_many(texts).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.get().await?.embed(text).await
    }
}

// Application composition root
// Owns every long-lived handle: stores, providers, the orchestrator and the background indexer

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::lancedb::{VectorIndex, VectorStore};
use crate::database::sqlite::{
    ChatMessage, Database, Document, DocumentUpdate, IndexStatus, NewChatMessage, NewChatSession,
    NewDocument, SessionWithDocuments,
};
use crate::embeddings::{EmbeddingProvider, LazyEmbeddingProvider};
use crate::extraction::TextExtractor;
use crate::generation::{AnswerGenerator, ChatModel, OllamaChat};
use crate::indexer::{
    IndexerHandle, IngestionPipeline, QueueStats, StatusTrackingExecutor, spawn_indexer,
};
use crate::rag::{RagAnswer, RagOrchestrator};
use crate::{RagError, Result};

/// Document counts per indexing status, plus index and queue figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppStatus {
    pub pending: i64,
    pub indexing: i64,
    pub indexed: i64,
    pub empty: i64,
    pub failed: i64,
    pub vector_chunks: u64,
    pub queue: QueueStats,
}

pub struct App {
    config: Config,
    database: Database,
    vector_store: Arc<VectorStore>,
    extractor: TextExtractor,
    orchestrator: RagOrchestrator,
    indexer: IndexerHandle,
}

impl App {
    /// Open the stores under the configured base directory and connect to Ollama.
    ///
    /// The embedding provider is initialised here so a misconfigured server fails at
    /// startup instead of on the first upload.
    #[inline]
    pub async fn initialize(config: Config) -> Result<Self> {
        info!(
            "Initializing application in {}",
            config.get_base_dir().display()
        );
        config.validate()?;

        let lazy = LazyEmbeddingProvider::from_config(&config.ollama);
        lazy.get().await?;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(lazy);

        let chat: Arc<dyn ChatModel> =
            Arc::new(OllamaChat::new(&config.ollama, &config.generation)?);

        Self::with_components(config, embedder, chat).await
    }

    /// Build the application around the given providers. Must be called inside a Tokio runtime.
    #[inline]
    pub async fn with_components(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let expected = config.ollama.embedding_dimension as usize;
        if embedder.dimension() != expected {
            return Err(RagError::Config(format!(
                "Embedding provider produces {}-dimensional vectors but the index expects {}",
                embedder.dimension(),
                expected
            )));
        }

        let database = Database::from_config(&config).await?;
        let vector_store = Arc::new(VectorStore::new(&config).await?);

        let generator = Arc::new(AnswerGenerator::new(chat, &config.generation));
        let orchestrator = RagOrchestrator::new(
            Arc::new(database.clone()),
            Arc::clone(&vector_store) as Arc<dyn VectorIndex>,
            Arc::clone(&embedder),
            generator,
            config.retrieval.top_k,
        );

        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&vector_store) as Arc<dyn VectorIndex>,
            embedder,
            config.chunking.clone(),
            config.ollama.batch_size as usize,
        ));
        let executor = Arc::new(StatusTrackingExecutor::new(pipeline, database.clone()));
        let indexer = spawn_indexer(executor, &config.indexer);

        debug!("Application components initialized");

        Ok(Self {
            extractor: TextExtractor::new(&config.extraction),
            config,
            database,
            vector_store,
            orchestrator,
            indexer,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Store an uploaded file and queue it for indexing.
    ///
    /// Files with no extractable text are kept with status `failed` and are not queued.
    #[inline]
    pub async fn upload_document(
        &self,
        owner_user_id: i64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Document> {
        let kind = self
            .extractor
            .validate_upload(filename, bytes.len() as u64)?;

        let extractor = self.extractor.clone();
        let name = filename.to_string();
        let text = tokio::task::spawn_blocking(move || extractor.extract_text(&bytes, &name))
            .await
            .unwrap_or_else(|e| {
                error!("Extraction task for {} failed: {}", filename, e);
                None
            });

        let document = self
            .database
            .create_document(NewDocument {
                owner_user_id,
                filename: filename.to_string(),
                content_type: kind.as_str().to_string(),
            })
            .await?;

        info!(
            "Stored document {} ({}) for user {}",
            document.id, filename, owner_user_id
        );

        let Some(text) = text else {
            warn!(
                "Document {} has no extractable text, it will not be indexed",
                document.id
            );
            let update = DocumentUpdate {
                index_status: Some(IndexStatus::Failed),
                error_message: Some(format!("No text could be extracted from {}", filename)),
                ..DocumentUpdate::default()
            };
            let updated = self.database.update_document(document.id, &update).await?;
            return Ok(updated.unwrap_or(document));
        };

        self.indexer
            .ingest(document.id, owner_user_id, text)
            .await?;

        Ok(document)
    }

    #[inline]
    pub async fn list_documents(&self, owner_user_id: i64) -> Result<Vec<Document>> {
        Ok(self.database.list_documents(owner_user_id).await?)
    }

    /// Delete the document row, then queue removal of its chunks.
    /// Returns `false` when the user owns no such document.
    #[inline]
    pub async fn delete_document(&self, owner_user_id: i64, document_id: i64) -> Result<bool> {
        if !self
            .database
            .delete_document(owner_user_id, document_id)
            .await?
        {
            debug!(
                "Document {} not found for user {}",
                document_id, owner_user_id
            );
            return Ok(false);
        }

        self.indexer
            .delete_document_vectors(document_id, owner_user_id)
            .await?;

        info!("Deleted document {} of user {}", document_id, owner_user_id);
        Ok(true)
    }

    #[inline]
    pub async fn create_session(
        &self,
        user_id: i64,
        session_name: Option<String>,
        document_ids: Vec<i64>,
    ) -> Result<SessionWithDocuments> {
        self.database
            .create_session(NewChatSession {
                user_id,
                session_name,
                document_ids,
            })
            .await?
            .ok_or_else(|| {
                RagError::NotFound(format!(
                    "One or more documents not found for user {}",
                    user_id
                ))
            })
    }

    #[inline]
    pub async fn list_sessions(&self, user_id: i64) -> Result<Vec<SessionWithDocuments>> {
        Ok(self.database.list_sessions(user_id).await?)
    }

    #[inline]
    pub async fn delete_session(&self, user_id: i64, session_id: i64) -> Result<bool> {
        Ok(self.database.delete_session(user_id, session_id).await?)
    }

    #[inline]
    pub async fn chat_history(&self, user_id: i64, session_id: i64) -> Result<Vec<ChatMessage>> {
        self.require_session(user_id, session_id).await?;
        Ok(self.database.chat_history(session_id).await?)
    }

    /// Answer `question` within the session and record the exchange
    #[inline]
    pub async fn ask(&self, question: &str, user_id: i64, session_id: i64) -> Result<RagAnswer> {
        self.require_session(user_id, session_id).await?;

        let answer = self
            .orchestrator
            .answer_question(question, user_id, session_id)
            .await;

        if let Err(e) = self
            .database
            .add_message(NewChatMessage {
                session_id,
                message: question.to_string(),
                response: answer.answer.clone(),
            })
            .await
        {
            error!("Failed to store message in session {}: {:#}", session_id, e);
        }

        Ok(answer)
    }

    #[inline]
    pub async fn status(&self) -> Result<AppStatus> {
        Ok(AppStatus {
            pending: self.count_status(IndexStatus::Pending).await?,
            indexing: self.count_status(IndexStatus::Indexing).await?,
            indexed: self.count_status(IndexStatus::Indexed).await?,
            empty: self.count_status(IndexStatus::Empty).await?,
            failed: self.count_status(IndexStatus::Failed).await?,
            vector_chunks: self.vector_store.count(None).await?,
            queue: self.indexer.stats(),
        })
    }

    /// Stop accepting background work and wait for queued jobs to finish
    #[inline]
    pub async fn shutdown(self) -> QueueStats {
        info!("Shutting down, waiting for background jobs");
        self.indexer.shutdown().await
    }

    async fn require_session(&self, user_id: i64, session_id: i64) -> Result<SessionWithDocuments> {
        self.database
            .get_session(user_id, session_id)
            .await?
            .ok_or_else(|| {
                RagError::NotFound(format!(
                    "Session {} not found for user {}",
                    session_id, user_id
                ))
            })
    }

    async fn count_status(&self, status: IndexStatus) -> Result<i64> {
        Ok(self.database.count_documents_by_status(status).await?)
    }
}

impl std::fmt::Debug for App {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("base_dir", &self.config.get_base_dir())
            .field("orchestrator", &self.orchestrator)
            .field("indexer", &self.indexer)
            .finish_non_exhaustive()
    }
}

// RAG orchestration: session scope -> retrieval -> generation


use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::database::lancedb::{ChunkMetadata, VectorIndex};
use crate::embeddings::EmbeddingProvider;
use crate::generation::{AnswerGenerator, ERROR_ANSWER, INSUFFICIENT_CONTEXT_ANSWER};
use crate::retrieval::{RetrievedChunk, make_retriever};
use crate::{RagError, Result};

/// Read access to the documents linked to a chat session
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Linked document ids, or `None` when `session_id` does not belong to `user_id`
    async fn get_session_documents(&self, session_id: i64, user_id: i64)
    -> Result<Option<Vec<i64>>>;
}

/// A chunk that was given to the model as context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl From<RetrievedChunk> for ContextRecord {
    #[inline]
    fn from(chunk: RetrievedChunk) -> Self {
        Self {
            text: chunk.text,
            metadata: chunk.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub context: Vec<ContextRecord>,
}

impl RagAnswer {
    fn degraded(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            context: Vec::new(),
        }
    }
}

pub struct RagOrchestrator {
    sessions: Arc<dyn SessionStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<AnswerGenerator>,
    top_k: usize,
}

impl RagOrchestrator {
    #[inline]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<AnswerGenerator>,
        top_k: usize,
    ) -> Self {
        Self {
            sessions,
            index,
            embedder,
            generator,
            top_k,
        }
    }

    /// Documents the session is restricted to. A missing session or a store failure
    /// falls back to the whole of the user's documents.
    async fn resolve_scope(&self, session_id: i64, user_id: i64) -> Vec<i64> {
        match self.sessions.get_session_documents(session_id, user_id).await {
            Ok(Some(document_ids)) => {
                debug!(
                    "Session {} is linked to {} documents: {:?}",
                    session_id,
                    document_ids.len(),
                    document_ids
                );
                document_ids
            }
            Ok(None) => {
                warn!(
                    "Session {} not found for user {}, searching all of the user's documents",
                    session_id, user_id
                );
                Vec::new()
            }
            Err(e) => {
                warn!(
                    "Failed to load documents for session {}: {}, searching all of the user's documents",
                    session_id, e
                );
                Vec::new()
            }
        }
    }

    /// Answer `question` from `user_id`'s documents. Never fails: errors become fixed
    /// degraded answers with no context. An index failure gives the insufficient-context
    /// answer, a model provider failure gives the apology.
    #[inline]
    pub async fn answer_question(&self, question: &str, user_id: i64, session_id: i64) -> RagAnswer {
        info!(
            "Answering question for user {} in session {}",
            user_id, session_id
        );

        let document_ids = self.resolve_scope(session_id, user_id).await;

        let retriever = make_retriever(
            Arc::clone(&self.index),
            Arc::clone(&self.embedder),
            user_id,
            Some(&document_ids),
            self.top_k,
        );

        let chunks = match retriever.retrieve(question).await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Retrieval failed for user {}: {}", user_id, e);
                return RagAnswer::degraded(retrieval_failure_answer(&e));
            }
        };

        match self.generator.try_generate(question, &chunks).await {
            Ok(answer) => {
                debug!("Answered with {} context chunks", chunks.len());
                RagAnswer {
                    answer,
                    context: chunks.into_iter().map(ContextRecord::from).collect(),
                }
            }
            Err(e) => {
                error!("Answer generation failed for user {}: {}", user_id, e);
                RagAnswer::degraded(ERROR_ANSWER)
            }
        }
    }
}

/// Provider outages get the apology; index failures mean no context could be found
fn retrieval_failure_answer(error: &RagError) -> &'static str {
    match error {
        RagError::Embedding(_) | RagError::Network(_) | RagError::Config(_) => ERROR_ANSWER,
        _ => INSUFFICIENT_CONTEXT_ANSWER,
    }
}

impl std::fmt::Debug for RagOrchestrator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagOrchestrator")
            .field("generator", &self.generator)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

// Grounded answer generation with fixed refusal and apology messages

#[cfg(test)]
mod tests;
#[cfg(test)]
pub(crate) mod testing;

pub mod ollama_chat;

use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::GenerationConfig;
use crate::retrieval::RetrievedChunk;
use crate::{RagError, Result};

pub use ollama_chat::OllamaChat;

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
pub const NO_CONTEXT: &str = "No relevant context found.";
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough information in the provided context to answer that.";
pub const ERROR_ANSWER: &str = "Sorry, an error occurred processing your request.";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

/// A language model that turns one system directive plus one user turn into text
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    domain: String,
    temperature: f32,
    timeout: Duration,
}

impl AnswerGenerator {
    #[inline]
    pub fn new(model: Arc<dyn ChatModel>, config: &GenerationConfig) -> Self {
        Self {
            model,
            domain: config.domain.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Reply for questions outside the configured domain
    #[inline]
    pub fn refusal_message(&self) -> String {
        format!(
            "I'm designed to answer {domain} questions or assist with {domain} documents. \
             Please ask something related to {domain}.",
            domain = self.domain
        )
    }

    #[inline]
    pub fn system_prompt(&self) -> String {
        format!(
            "You are a knowledgeable and reliable {domain} assistant.\n\
             You specialise in understanding and summarising {domain} documents and answering {domain} questions.\n\
             Answer only from the provided context and only on {domain} topics.\n\
             If the user asks about an uploaded document, assume it is a {domain} document and answer from it, \
             even when the question does not mention {domain} explicitly.\n\
             If the question is unrelated to {domain} and the context does not help, respond exactly:\n\
             \"{refusal}\"\n\
             If the context does not contain the answer, respond exactly:\n\
             \"{insufficient}\"\n\
             Never fabricate information.",
            domain = self.domain,
            refusal = self.refusal_message(),
            insufficient = INSUFFICIENT_CONTEXT_ANSWER,
        )
    }

    /// Join chunk texts with a visible separator
    #[inline]
    pub fn format_context(chunks: &[RetrievedChunk]) -> String {
        if chunks.is_empty() {
            return NO_CONTEXT.to_string();
        }

        chunks.iter().map(|chunk| chunk.text.as_str()).join(CONTEXT_SEPARATOR)
    }

    #[inline]
    pub fn build_request(&self, question: &str, chunks: &[RetrievedChunk]) -> ChatRequest {
        ChatRequest {
            system: self.system_prompt(),
            user: format!(
                "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
                Self::format_context(chunks),
                question
            ),
            temperature: self.temperature,
        }
    }

    /// Generate an answer, returning provider failures, timeouts and empty replies as errors
    #[inline]
    pub async fn try_generate(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        let request = self.build_request(question, chunks);

        debug!(
            "Generating answer from {} context chunks ({} characters of prompt)",
            chunks.len(),
            request.user.chars().count()
        );

        let answer = tokio::time::timeout(self.timeout, self.model.complete(&request))
            .await
            .map_err(|_| {
                RagError::Generation(format!(
                    "Model did not answer within {} seconds",
                    self.timeout.as_secs_f32()
                ))
            })??;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(RagError::Generation(
                "Model returned an empty answer".to_string(),
            ));
        }

        Ok(answer.to_string())
    }

    /// Generate an answer, degrading every failure to the fixed apology
    #[inline]
    pub async fn generate(&self, question: &str, chunks: &[RetrievedChunk]) -> String {
        match self.try_generate(question, chunks).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Answer generation failed: {}", e);
                ERROR_ANSWER.to_string()
            }
        }
    }
}

impl std::fmt::Debug for AnswerGenerator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerGenerator")
            .field("domain", &self.domain)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

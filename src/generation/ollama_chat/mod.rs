#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{ChatModel, ChatRequest};
use crate::config::{GenerationConfig, OllamaConfig};
use crate::ollama::{ChatMessage, OllamaClient};
use crate::{RagError, Result};

/// Chat model served by the same Ollama endpoint as the embeddings
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: OllamaClient,
}

impl OllamaChat {
    #[inline]
    pub fn new(ollama: &OllamaConfig, generation: &GenerationConfig) -> Result<Self> {
        let client = OllamaClient::new(ollama)?
            .with_model(generation.model.clone())
            .with_timeout(Duration::from_secs(generation.timeout_seconds));

        Ok(Self::with_client(client))
    }

    #[inline]
    pub fn with_client(client: OllamaClient) -> Self {
        Self { client }
    }

    #[inline]
    pub fn model(&self) -> &str {
        self.client.model()
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let client = self.client.clone();
        let messages = vec![
            ChatMessage::system(request.system.clone()),
            ChatMessage::user(request.user.clone()),
        ];
        let temperature = request.temperature;

        debug!("Requesting completion from {}", self.client.model());

        tokio::task::spawn_blocking(move || client.chat(&messages, temperature))
            .await
            .map_err(|e| RagError::Generation(format!("Chat task failed: {}", e)))?
            .map_err(|e| RagError::Network(format!("{:#}", e)))
    }
}

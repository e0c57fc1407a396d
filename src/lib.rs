use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Document {document_id} of user {owner_user_id} already has indexed chunks; delete them before re-ingesting"
    )]
    AlreadyIndexed {
        owner_user_id: i64,
        document_id: i64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<config::ConfigError> for RagError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod app;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extraction;
pub mod generation;
pub mod indexer;
pub mod ollama;
pub mod rag;
pub mod retrieval;

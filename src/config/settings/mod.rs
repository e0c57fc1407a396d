
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
pub const API_KEY_ENV_VAR: &str = "DOCQA_API_KEY";
const CONFIG_DIR_NAME: &str = ".docqa";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            api_key: None,
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

/// Chat model settings. Requests go to the same server as embeddings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Subject area the assistant is restricted to, e.g. "legal"
    pub domain: String,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            temperature: 0.1,
            timeout_seconds: 60,
            domain: "legal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexerConfig {
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
}

impl Default for IndexerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_file_size_bytes: u64,
    pub tesseract_command: String,
    pub ocr_language: String,
}

impl Default for ExtractionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            tesseract_command: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
        }
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            indexer: IndexerConfig::default(),
            extraction: ExtractionConfig::default(),
            base_dir: Self::config_dir().unwrap_or_else(|_| PathBuf::from(CONFIG_DIR_NAME)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("An API key is required for https endpoints (set ollama.api_key or {API_KEY_ENV_VAR})")]
    MissingApiKey,
    #[error("Malformed API key (must be non-empty and contain no whitespace)")]
    MalformedApiKey,
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid domain: cannot be empty")]
    InvalidDomain,
    #[error("Invalid chunk size: {0} (must be between 64 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top_k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid concurrent job count: {0} (must be between 1 and 32)")]
    InvalidConcurrency(usize),
    #[error("Invalid queue capacity: {0} (must be between 1 and 10000)")]
    InvalidQueueCapacity(usize),
    #[error("Invalid max file size: {0} bytes (must be greater than zero)")]
    InvalidMaxFileSize(u64),
    #[error("Invalid OCR command: cannot be empty")]
    InvalidOcrCommand,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `~/.docqa`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when the file is absent.
    /// The API key environment variable overrides the file.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides(|name| std::env::var(name).ok());

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV_VAR) {
            self.ollama.api_key = Some(key);
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.generation.validate()?;
        self.validate_chunking_config()?;

        if !(1..=50).contains(&self.retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        if !(1..=32).contains(&self.indexer.max_concurrent_jobs) {
            return Err(ConfigError::InvalidConcurrency(
                self.indexer.max_concurrent_jobs,
            ));
        }

        if !(1..=10_000).contains(&self.indexer.queue_capacity) {
            return Err(ConfigError::InvalidQueueCapacity(
                self.indexer.queue_capacity,
            ));
        }

        if self.extraction.max_file_size_bytes == 0 {
            return Err(ConfigError::InvalidMaxFileSize(
                self.extraction.max_file_size_bytes,
            ));
        }

        if self.extraction.tesseract_command.trim().is_empty() {
            return Err(ConfigError::InvalidOcrCommand);
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(64..=8192).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    /// Credentials to send with each request.
    ///
    /// A missing key is only an error for https endpoints; a present key must be well formed.
    #[inline]
    pub fn credentials(&self) -> Result<Option<&str>, ConfigError> {
        match self.api_key.as_deref() {
            Some(key) => {
                if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    Err(ConfigError::MalformedApiKey)
                } else {
                    Ok(Some(key))
                }
            }
            None if self.protocol == "https" => Err(ConfigError::MissingApiKey),
            None => Ok(None),
        }
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.ollama_url()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }

    #[inline]
    pub fn set_api_key(&mut self, api_key: Option<String>) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            api_key: api_key.clone(),
            ..self.clone()
        };
        temp_config.credentials()?;
        self.api_key = api_key;
        Ok(())
    }
}

impl GenerationConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if self.domain.trim().is_empty() {
            return Err(ConfigError::InvalidDomain);
        }

        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }

    #[inline]
    pub fn set_domain(&mut self, domain: String) -> Result<(), ConfigError> {
        if domain.trim().is_empty() {
            return Err(ConfigError::InvalidDomain);
        }
        self.domain = domain;
        Ok(())
    }
}

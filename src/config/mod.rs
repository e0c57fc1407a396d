// Configuration management module
// TOML settings under the base directory plus the interactive setup

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    API_KEY_ENV_VAR, Config, ConfigError, ExtractionConfig, GenerationConfig, IndexerConfig,
    OllamaConfig, RetrievalConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

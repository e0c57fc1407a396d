
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;

use super::{Config, ConfigError, GenerationConfig, OllamaConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 DocQA Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the Ollama server used for embeddings and answers.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Answer Generation").bold().yellow());
    configure_generation(&mut config.generation)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before uploading documents.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Embedding Model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  API Key: {}",
        style(if config.ollama.api_key.is_some() {
            "configured"
        } else {
            "not set"
        })
        .cyan()
    );

    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Generation Settings:").bold().yellow());
    eprintln!("  Chat Model: {}", style(&config.generation.model).cyan());
    eprintln!(
        "  Temperature: {}",
        style(config.generation.temperature).cyan()
    );
    eprintln!("  Domain: {}", style(&config.generation.domain).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!(
        "  Chunk Size / Overlap: {} / {}",
        style(config.chunking.chunk_size).cyan(),
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    match Config::load(config_dir) {
        Ok(config) => {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        }
        Err(_) => {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        }
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.ollama_url()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let api_key = if protocol == "https" {
        let key = Password::new()
            .with_prompt("API key")
            .validate_with(|input: &String| -> Result<(), ConfigError> {
                let temp_config = OllamaConfig {
                    api_key: Some(input.clone()),
                    ..OllamaConfig::default()
                };
                temp_config.credentials()?;
                Ok(())
            })
            .interact()?;
        Some(key)
    } else {
        ollama.api_key.clone()
    };

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;
    ollama.set_batch_size(batch_size)?;
    ollama.set_api_key(api_key)?;

    Ok(())
}

fn configure_generation(generation: &mut GenerationConfig) -> Result<()> {
    let model: String = Input::new()
        .with_prompt("Chat model")
        .default(generation.model.clone())
        .interact_text()?;

    let temperature: f32 = Input::new()
        .with_prompt("Temperature")
        .default(generation.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    let domain: String = Input::new()
        .with_prompt("Subject domain the assistant answers about")
        .default(generation.domain.clone())
        .interact_text()?;

    generation.set_model(model)?;
    generation.set_temperature(temperature)?;
    generation.set_domain(domain)?;

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    let mut request = agent.get(&url);
    if let Some(key) = ollama.api_key.as_deref() {
        request = request.header("Authorization", format!("Bearer {}", key));
    }

    match request.call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}

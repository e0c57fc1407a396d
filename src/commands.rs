use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::app::App;
use crate::config::Config;
use crate::database::lancedb::{VectorIndex, VectorStore};
use crate::database::sqlite::{Database, IndexStatus, NewChatSession};
use crate::indexer::ConsistencyValidator;
use crate::ollama::OllamaClient;

async fn open_app(config_dir: &Path) -> Result<App> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    App::initialize(config)
        .await
        .context("Failed to initialize application")
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::from_config(config)
        .await
        .context("Failed to initialize database")
}

/// Drain the background queue so enqueued work completes before the process exits
async fn finish(app: App) {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    if let Ok(spinner) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(spinner);
    }
    bar.set_message("Waiting for background indexing to finish");
    bar.enable_steady_tick(Duration::from_millis(100));

    let stats = app.shutdown().await;
    bar.finish_and_clear();

    if stats.failed > 0 {
        eprintln!(
            "{}",
            style(format!("⚠ {} background job(s) failed, see the log", stats.failed)).yellow()
        );
    }
}

/// Upload a file and index it
#[inline]
pub async fn upload(config_dir: &Path, user_id: i64, file: &Path) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", file.display()))?
        .to_string();
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let app = open_app(config_dir).await?;
    let document = app.upload_document(user_id, &filename, bytes).await;
    let document = match document {
        Ok(document) => document,
        Err(e) => {
            finish(app).await;
            return Err(e.into());
        }
    };

    println!("Uploaded {} (ID: {})", document.filename, document.id);
    if document.is_failed() {
        println!(
            "Status: {} - {}",
            document.index_status,
            document.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    let config = app.config().clone();
    finish(app).await;

    let database = open_database(&config).await?;
    if let Some(document) = database.get_document(document.id).await? {
        println!(
            "Status: {} ({} chunks)",
            document.index_status, document.chunk_count
        );
    }

    Ok(())
}

/// List the documents a user owns
#[inline]
pub async fn list_documents(config_dir: &Path, user_id: i64) -> Result<()> {
    let config = Config::load(config_dir)?;
    let database = open_database(&config).await?;

    let documents = database.list_documents(user_id).await?;
    if documents.is_empty() {
        println!("No documents uploaded for user {}.", user_id);
        println!("Use 'docqa upload --user {} <file>' to add one.", user_id);
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        println!("📄 {} (ID: {})", document.filename, document.id);
        println!("   Type: {}", document.content_type);
        println!("   Status: {}", document.index_status);
        if document.chunk_count > 0 {
            println!("   Chunks: {}", document.chunk_count);
        }
        println!("   Uploaded: {}", document.created_date.format("%Y-%m-%d %H:%M"));
        if let Some(error) = &document.error_message {
            println!("   ⚠️  Error: {}", error);
        }
        println!();
    }

    Ok(())
}

/// Delete a document and queue removal of its chunks
#[inline]
pub async fn delete_document(config_dir: &Path, user_id: i64, document_id: i64) -> Result<()> {
    let app = open_app(config_dir).await?;
    let deleted = app.delete_document(user_id, document_id).await;
    finish(app).await;

    if deleted? {
        println!("Document {} deleted", document_id);
        println!("✓ Document metadata deleted");
        println!("✓ Indexed chunks deleted");
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Document {} not found for user {}",
            document_id,
            user_id
        ))
    }
}

#[inline]
pub async fn create_session(
    config_dir: &Path,
    user_id: i64,
    name: Option<String>,
    document_ids: Vec<i64>,
) -> Result<()> {
    let config = Config::load(config_dir)?;
    let database = open_database(&config).await?;

    let session = database
        .create_session(NewChatSession {
            user_id,
            session_name: name,
            document_ids,
        })
        .await?
        .ok_or_else(|| anyhow::anyhow!("One or more documents not found for user {}", user_id))?;

    println!(
        "Created session: {} (ID: {})",
        session.session.session_name, session.session.id
    );
    if session.document_ids.is_empty() {
        println!("Questions will search all of the user's documents.");
    } else {
        println!("Linked documents: {:?}", session.document_ids);
    }

    Ok(())
}

#[inline]
pub async fn list_sessions(config_dir: &Path, user_id: i64) -> Result<()> {
    let config = Config::load(config_dir)?;
    let database = open_database(&config).await?;

    let sessions = database.list_sessions(user_id).await?;
    if sessions.is_empty() {
        println!("No chat sessions for user {}.", user_id);
        return Ok(());
    }

    println!("Chat Sessions ({} total):", sessions.len());
    println!();
    for session in &sessions {
        println!("💬 {} (ID: {})", session.session.session_name, session.session.id);
        println!(
            "   Created: {}",
            session.session.created_date.format("%Y-%m-%d %H:%M")
        );
        if session.document_ids.is_empty() {
            println!("   Documents: all");
        } else {
            println!("   Documents: {:?}", session.document_ids);
        }
    }

    Ok(())
}

#[inline]
pub async fn delete_session(config_dir: &Path, user_id: i64, session_id: i64) -> Result<()> {
    let config = Config::load(config_dir)?;
    let database = open_database(&config).await?;

    if database.delete_session(user_id, session_id).await? {
        println!("Session {} deleted", session_id);
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Session {} not found for user {}",
            session_id,
            user_id
        ))
    }
}

/// Ask a question within a chat session
#[inline]
pub async fn ask(
    config_dir: &Path,
    user_id: i64,
    session_id: i64,
    question: &str,
    json: bool,
) -> Result<()> {
    let app = open_app(config_dir).await?;
    let answer = app.ask(question, user_id, session_id).await;
    finish(app).await;
    let answer = answer?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&answer).context("Failed to serialize answer")?
        );
        return Ok(());
    }

    println!("{}", answer.answer);
    if !answer.context.is_empty() {
        println!();
        println!("{}", style("Sources:").bold());
        for record in &answer.context {
            println!("  • {}", record.metadata.source);
        }
    }

    Ok(())
}

#[inline]
pub async fn history(config_dir: &Path, user_id: i64, session_id: i64) -> Result<()> {
    let config = Config::load(config_dir)?;
    let database = open_database(&config).await?;

    if database.get_session(user_id, session_id).await?.is_none() {
        return Err(anyhow::anyhow!(
            "Session {} not found for user {}",
            session_id,
            user_id
        ));
    }

    let messages = database.chat_history(session_id).await?;
    if messages.is_empty() {
        println!("No messages in session {} yet.", session_id);
        return Ok(());
    }

    for message in &messages {
        println!(
            "{} {}",
            style(message.created_date.format("[%Y-%m-%d %H:%M]")).dim(),
            style(&message.message).bold()
        );
        println!("{}", message.response);
        println!();
    }

    Ok(())
}

/// Show connectivity and indexing status
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {:#}", e);
        Config {
            base_dir: config_dir.to_path_buf(),
            ..Config::default()
        }
    });

    println!("📊 DocQA Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Database Status:");
    let database = match open_database(&config).await {
        Ok(db) => {
            println!("   ✅ SQLite: Connected");
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to connect - {:#}", e);
            None
        }
    };

    println!("🤖 Ollama Status:");
    let ollama = config.ollama.clone();
    let health = tokio::task::spawn_blocking(move || {
        OllamaClient::new(&ollama)
            .map_err(anyhow::Error::from)
            .and_then(|client| client.health_check())
    })
    .await
    .context("Health check task failed")?;
    match health {
        Ok(()) => {
            println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            );
            println!("   📋 Embedding Model: {}", config.ollama.model);
        }
        Err(e) => {
            println!("   ⚠️  Ollama: Unavailable - {:#}", e);
        }
    }

    println!("🔍 Vector Database Status:");
    match VectorStore::new(&config).await {
        Ok(store) => match store.count(None).await {
            Ok(count) => println!("   ✅ LanceDB: Connected ({} chunks)", count),
            Err(e) => println!("   ⚠️  LanceDB: Connected but unreadable - {}", e),
        },
        Err(e) => {
            println!("   ❌ LanceDB: Failed to open - {}", e);
        }
    }

    if let Some(database) = database {
        println!();
        println!("📚 Documents:");
        for status in [
            IndexStatus::Pending,
            IndexStatus::Indexing,
            IndexStatus::Indexed,
            IndexStatus::Empty,
            IndexStatus::Failed,
        ] {
            let count = database.count_documents_by_status(status).await?;
            println!("   {}: {}", status, count);
        }
    }

    Ok(())
}

/// Compare the documents table with the vector index, optionally removing orphaned chunks
#[inline]
pub async fn check(config_dir: &Path, fix: bool) -> Result<()> {
    let config = Config::load(config_dir)?;
    let database = open_database(&config).await?;
    let vector_store = VectorStore::new(&config)
        .await
        .context("Failed to open vector database")?;

    let validator = ConsistencyValidator::new(&database, &vector_store);
    let report = validator.validate_consistency().await?;

    println!("🔍 Database Consistency:");
    if report.is_consistent {
        println!("   ✅ {}", report.summary());
        return Ok(());
    }

    println!("   ⚠️  {}", report.summary());
    for scope in &report.orphaned {
        println!("   👻 Orphaned chunks: {}", scope);
    }
    for scope in &report.missing {
        println!("   🚫 Missing chunks: {}", scope);
    }

    if fix {
        let removed = validator.cleanup_orphaned(&report.orphaned).await?;
        info!("Consistency fix removed {} chunks", removed);
        println!("   ✓ Removed {} orphaned chunks", removed);
        if !report.missing.is_empty() {
            println!("   Documents with missing chunks must be uploaded again.");
        }
    } else if !report.orphaned.is_empty() {
        println!("   Run 'docqa check --fix' to remove orphaned chunks.");
    }

    Ok(())
}

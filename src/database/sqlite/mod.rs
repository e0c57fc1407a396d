use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::config::Config;
use crate::database::sqlite::queries::{DocumentQueries, MessageQueries, SessionQueries};
use crate::rag::SessionStore;


pub mod models;
pub mod queries;

pub use models::*;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Open `metadata.db` under the configured base directory
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let base_dir = config.get_base_dir();
        std::fs::create_dir_all(base_dir).with_context(|| {
            format!("Failed to create config directory: {}", base_dir.display())
        })?;

        Self::new(config.database_path()).await
    }

    // Document operations
    #[inline]
    pub async fn create_document(&self, new_document: NewDocument) -> Result<Document> {
        DocumentQueries::create(&self.pool, new_document).await
    }

    #[inline]
    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn get_owned_document(
        &self,
        owner_user_id: i64,
        id: i64,
    ) -> Result<Option<Document>> {
        DocumentQueries::get_owned(&self.pool, owner_user_id, id).await
    }

    #[inline]
    pub async fn list_documents(&self, owner_user_id: i64) -> Result<Vec<Document>> {
        DocumentQueries::list_by_owner(&self.pool, owner_user_id).await
    }

    #[inline]
    pub async fn list_all_documents(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn update_document(
        &self,
        id: i64,
        update: &DocumentUpdate,
    ) -> Result<Option<Document>> {
        DocumentQueries::update(&self.pool, id, update.clone()).await
    }

    #[inline]
    pub async fn clear_document_error(&self, id: i64) -> Result<()> {
        DocumentQueries::clear_error(&self.pool, id).await
    }

    #[inline]
    pub async fn delete_document(&self, owner_user_id: i64, id: i64) -> Result<bool> {
        DocumentQueries::delete(&self.pool, owner_user_id, id).await
    }

    #[inline]
    pub async fn count_documents_by_status(&self, status: IndexStatus) -> Result<i64> {
        DocumentQueries::count_by_status(&self.pool, status).await
    }

    // Session operations
    #[inline]
    pub async fn create_session(
        &self,
        new_session: NewChatSession,
    ) -> Result<Option<SessionWithDocuments>> {
        SessionQueries::create(&self.pool, new_session).await
    }

    #[inline]
    pub async fn get_session(
        &self,
        user_id: i64,
        session_id: i64,
    ) -> Result<Option<SessionWithDocuments>> {
        SessionQueries::get_for_user(&self.pool, user_id, session_id).await
    }

    #[inline]
    pub async fn list_sessions(&self, user_id: i64) -> Result<Vec<SessionWithDocuments>> {
        SessionQueries::list_for_user(&self.pool, user_id).await
    }

    #[inline]
    pub async fn delete_session(&self, user_id: i64, session_id: i64) -> Result<bool> {
        SessionQueries::delete(&self.pool, user_id, session_id).await
    }

    // Message operations
    #[inline]
    pub async fn add_message(&self, new_message: NewChatMessage) -> Result<ChatMessage> {
        MessageQueries::create(&self.pool, new_message).await
    }

    #[inline]
    pub async fn chat_history(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        MessageQueries::list_for_session(&self.pool, session_id).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn get_session_documents(
        &self,
        session_id: i64,
        user_id: i64,
    ) -> crate::Result<Option<Vec<i64>>> {
        let session = self.get_session(user_id, session_id).await?;
        Ok(session.map(|s| s.document_ids))
    }
}


use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};

const DOCUMENT_COLUMNS: &str = "id, owner_user_id, filename, content_type, index_status, \
     chunk_count, error_message, created_date, indexed_date";

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO documents (owner_user_id, filename, content_type, index_status, created_date) \
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(new_document.owner_user_id)
        .bind(&new_document.filename)
        .bind(&new_document.content_type)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        let query = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let result = sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")?;

        Ok(result)
    }

    /// Fetch a document only if it belongs to `owner_user_id`
    #[inline]
    pub async fn get_owned(
        pool: &SqlitePool,
        owner_user_id: i64,
        id: i64,
    ) -> Result<Option<Document>> {
        let query = format!(
            "SELECT {} FROM documents WHERE id = ? AND owner_user_id = ?",
            DOCUMENT_COLUMNS
        );
        let result = sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .bind(owner_user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get owned document")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_owner(pool: &SqlitePool, owner_user_id: i64) -> Result<Vec<Document>> {
        let query = format!(
            "SELECT {} FROM documents WHERE owner_user_id = ? ORDER BY created_date DESC, id DESC",
            DOCUMENT_COLUMNS
        );
        let documents = sqlx::query_as::<_, Document>(&query)
            .bind(owner_user_id)
            .fetch_all(pool)
            .await
            .context("Failed to list documents for owner")?;

        Ok(documents)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Document>> {
        let query = format!("SELECT {} FROM documents ORDER BY id ASC", DOCUMENT_COLUMNS);
        let documents = sqlx::query_as::<_, Document>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list all documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: DocumentUpdate,
    ) -> Result<Option<Document>> {
        let mut query_parts = Vec::new();
        let mut query_values = Vec::new();

        if let Some(status) = update.index_status {
            query_parts.push("index_status = ?");
            query_values.push(status.as_str().to_string());
        }

        if let Some(chunk_count) = update.chunk_count {
            query_parts.push("chunk_count = ?");
            query_values.push(chunk_count.to_string());
        }

        if let Some(error) = update.error_message {
            query_parts.push("error_message = ?");
            query_values.push(error);
        }

        if let Some(indexed_date) = update.indexed_date {
            query_parts.push("indexed_date = ?");
            query_values.push(indexed_date.to_string());
        }

        if query_parts.is_empty() {
            return Self::get_by_id(pool, id).await;
        }

        let query_str = format!(
            "UPDATE documents SET {} WHERE id = ?",
            query_parts.join(", ")
        );

        let mut query = sqlx::query(&query_str);
        for value in query_values {
            query = query.bind(value);
        }
        query = query.bind(id);

        query
            .execute(pool)
            .await
            .context("Failed to update document")?;

        Self::get_by_id(pool, id).await
    }

    /// Clear a previous failure reason, used when a document is re-queued
    #[inline]
    pub async fn clear_error(pool: &SqlitePool, id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET error_message = NULL WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to clear document error")?;

        Ok(())
    }

    /// Delete a document owned by `owner_user_id`. Session links cascade.
    #[inline]
    pub async fn delete(pool: &SqlitePool, owner_user_id: i64, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND owner_user_id = ?")
            .bind(id)
            .bind(owner_user_id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count_by_status(pool: &SqlitePool, status: IndexStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE index_status = ?")
                .bind(status.as_str())
                .fetch_one(pool)
                .await
                .context("Failed to count documents by status")?;

        Ok(count)
    }
}

pub struct SessionQueries;

impl SessionQueries {
    /// Create a session and link its documents in one transaction.
    ///
    /// Returns `None` without writing anything when a linked document does not
    /// exist or belongs to another user.
    #[inline]
    pub async fn create(
        pool: &SqlitePool,
        new_session: NewChatSession,
    ) -> Result<Option<SessionWithDocuments>> {
        let mut document_ids = new_session.document_ids.clone();
        document_ids.sort_unstable();
        document_ids.dedup();

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for session creation")?;

        for &document_id in &document_ids {
            let owned: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM documents WHERE id = ? AND owner_user_id = ?",
            )
            .bind(document_id)
            .bind(new_session.user_id)
            .fetch_one(&mut *transaction)
            .await
            .context("Failed to verify document ownership")?;

            if owned == 0 {
                warn!(
                    "Refusing to link document {} to a session of user {}",
                    document_id, new_session.user_id
                );
                return Ok(None);
            }
        }

        let now = Utc::now().naive_utc();
        let session_id = sqlx::query(
            "INSERT INTO chat_sessions (user_id, session_name, created_date) VALUES (?, ?, ?)",
        )
        .bind(new_session.user_id)
        .bind(new_session.resolved_name())
        .bind(now)
        .execute(&mut *transaction)
        .await
        .context("Failed to create chat session")?
        .last_insert_rowid();

        for &document_id in &document_ids {
            sqlx::query("INSERT INTO session_documents (session_id, document_id) VALUES (?, ?)")
                .bind(session_id)
                .bind(document_id)
                .execute(&mut *transaction)
                .await
                .context("Failed to link document to session")?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit session creation")?;

        debug!(
            "Created session {} with {} linked documents",
            session_id,
            document_ids.len()
        );

        Self::get_for_user(pool, new_session.user_id, session_id).await
    }

    #[inline]
    pub async fn get_for_user(
        pool: &SqlitePool,
        user_id: i64,
        session_id: i64,
    ) -> Result<Option<SessionWithDocuments>> {
        let session = sqlx::query_as::<_, ChatSession>(
            "SELECT id, user_id, session_name, created_date FROM chat_sessions \
             WHERE id = ? AND user_id = ?",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chat session")?;

        let Some(session) = session else {
            return Ok(None);
        };

        let document_ids = Self::document_ids(pool, session.id).await?;
        Ok(Some(SessionWithDocuments {
            session,
            document_ids,
        }))
    }

    #[inline]
    pub async fn document_ids(pool: &SqlitePool, session_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT document_id FROM session_documents WHERE session_id = ? ORDER BY document_id ASC",
        )
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to list session documents")?;

        Ok(ids)
    }

    #[inline]
    pub async fn list_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<SessionWithDocuments>> {
        let sessions = sqlx::query_as::<_, ChatSession>(
            "SELECT id, user_id, session_name, created_date FROM chat_sessions \
             WHERE user_id = ? ORDER BY created_date DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chat sessions")?;

        let mut result = Vec::with_capacity(sessions.len());
        for session in sessions {
            let document_ids = Self::document_ids(pool, session.id).await?;
            result.push(SessionWithDocuments {
                session,
                document_ids,
            });
        }

        Ok(result)
    }

    /// Delete a session with its messages and links. Documents are untouched.
    #[inline]
    pub async fn delete(pool: &SqlitePool, user_id: i64, session_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ? AND user_id = ?")
            .bind(session_id)
            .bind(user_id)
            .execute(pool)
            .await
            .context("Failed to delete chat session")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct MessageQueries;

impl MessageQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_message: NewChatMessage) -> Result<ChatMessage> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO chat_messages (session_id, message, response, created_date) VALUES (?, ?, ?, ?)",
        )
        .bind(new_message.session_id)
        .bind(&new_message.message)
        .bind(&new_message.response)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to store chat message")?
        .last_insert_rowid();

        let message = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, session_id, message, response, created_date FROM chat_messages WHERE id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to retrieve created chat message")?;

        Ok(message)
    }

    /// Messages of a session, oldest first
    #[inline]
    pub async fn list_for_session(pool: &SqlitePool, session_id: i64) -> Result<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, session_id, message, response, created_date FROM chat_messages \
             WHERE session_id = ? ORDER BY created_date ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chat messages")?;

        Ok(messages)
    }
}


use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub owner_user_id: i64,
    pub filename: String,
    pub content_type: String,
    pub index_status: IndexStatus,
    pub chunk_count: i64,
    pub error_message: Option<String>,
    pub created_date: NaiveDateTime,
    pub indexed_date: Option<NaiveDateTime>,
}

/// What the background indexer did with a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Pending,
    Indexing,
    Indexed,
    /// Extraction produced text but chunking yielded nothing to embed
    Empty,
    Failed,
}

impl IndexStatus {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            IndexStatus::Pending => "pending",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Indexed => "indexed",
            IndexStatus::Empty => "empty",
            IndexStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IndexStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            IndexStatus::Pending => write!(f, "Pending"),
            IndexStatus::Indexing => write!(f, "Indexing"),
            IndexStatus::Indexed => write!(f, "Indexed"),
            IndexStatus::Empty => write!(f, "Empty"),
            IndexStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub owner_user_id: i64,
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentUpdate {
    pub index_status: Option<IndexStatus>,
    pub chunk_count: Option<i64>,
    pub error_message: Option<String>,
    pub indexed_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: i64,
    pub session_name: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWithDocuments {
    pub session: ChatSession,
    /// Linked document ids in ascending order
    pub document_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatSession {
    pub user_id: i64,
    /// Falls back to [`DEFAULT_SESSION_NAME`] when absent or blank
    pub session_name: Option<String>,
    pub document_ids: Vec<i64>,
}

pub const DEFAULT_SESSION_NAME: &str = "New Chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub message: String,
    pub response: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub session_id: i64,
    pub message: String,
    pub response: String,
}

impl Document {
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.index_status == IndexStatus::Indexed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.index_status == IndexStatus::Failed
    }

    /// Whether the vector index is expected to hold chunks for this document
    #[inline]
    pub fn expects_vectors(&self) -> bool {
        self.is_indexed() && self.chunk_count > 0
    }
}

impl NewChatSession {
    #[inline]
    pub fn resolved_name(&self) -> String {
        match self.session_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => DEFAULT_SESSION_NAME.to_string(),
        }
    }
}

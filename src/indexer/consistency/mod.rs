// Consistency validation between the documents table and the vector index


use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::database::lancedb::{ScopeFilter, VectorIndex, VectorStore};
use crate::database::sqlite::{Database, Document};

/// Chunks of one document as stored in the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DocumentScope {
    pub owner_user_id: i64,
    pub document_id: i64,
}

impl std::fmt::Display for DocumentScope {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "document {} of user {}",
            self.document_id, self.owner_user_id
        )
    }
}

impl From<(i64, i64)> for DocumentScope {
    #[inline]
    fn from((owner_user_id, document_id): (i64, i64)) -> Self {
        Self {
            owner_user_id,
            document_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Rows in the documents table
    pub documents: usize,
    /// Distinct documents with chunks in the vector index
    pub vector_scopes: usize,
    /// Chunks whose document row no longer exists
    pub orphaned: Vec<DocumentScope>,
    /// Documents marked indexed with chunks that have none in the index
    pub missing: Vec<DocumentScope>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Stores are consistent: {} documents, {} with indexed chunks",
                self.documents, self.vector_scopes
            )
        } else {
            format!(
                "Inconsistencies found: {} orphaned in the vector index, {} missing from the vector index",
                self.orphaned.len(),
                self.missing.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.orphaned.len() + self.missing.len()
    }
}

/// Compare document rows against the scopes present in the vector index
#[inline]
pub fn compare(documents: &[Document], vector_scopes: &BTreeSet<(i64, i64)>) -> ConsistencyReport {
    let known: BTreeSet<(i64, i64)> = documents
        .iter()
        .map(|d| (d.owner_user_id, d.id))
        .collect();

    let orphaned: Vec<DocumentScope> = vector_scopes
        .difference(&known)
        .copied()
        .map(DocumentScope::from)
        .collect();

    let missing: Vec<DocumentScope> = documents
        .iter()
        .filter(|d| d.expects_vectors())
        .map(|d| (d.owner_user_id, d.id))
        .filter(|scope| !vector_scopes.contains(scope))
        .map(DocumentScope::from)
        .collect();

    ConsistencyReport {
        documents: documents.len(),
        vector_scopes: vector_scopes.len(),
        is_consistent: orphaned.is_empty() && missing.is_empty(),
        orphaned,
        missing,
    }
}

pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    vector_store: &'a VectorStore,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(database: &'a Database, vector_store: &'a VectorStore) -> Self {
        Self {
            database,
            vector_store,
        }
    }

    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Starting cross-store consistency validation");

        let documents = self.database.list_all_documents().await?;
        debug!("Found {} document rows", documents.len());

        let scopes = self.vector_store.list_document_scopes().await?;
        debug!("Found chunks for {} documents in the vector index", scopes.len());

        let report = compare(&documents, &scopes);

        if report.is_consistent {
            info!("Consistency validation passed");
        } else {
            warn!("{}", report.summary());
            for scope in &report.orphaned {
                warn!("Orphaned chunks for {}", scope);
            }
            for scope in &report.missing {
                warn!("No chunks indexed for {}", scope);
            }
        }

        Ok(report)
    }

    /// Delete the chunks of documents that no longer exist, returning how many were removed
    #[inline]
    pub async fn cleanup_orphaned(&self, orphaned: &[DocumentScope]) -> Result<u64> {
        if orphaned.is_empty() {
            return Ok(0);
        }

        info!("Cleaning up chunks of {} orphaned documents", orphaned.len());

        let mut removed = 0;
        for scope in orphaned {
            let filter = ScopeFilter::document(scope.owner_user_id, scope.document_id);
            match self.vector_store.delete(&filter.to_predicate()).await {
                Ok(count) => {
                    removed += count;
                    debug!("Removed {} orphaned chunks of {}", count, scope);
                }
                Err(e) => {
                    error!("Failed to remove orphaned chunks of {}: {}", scope, e);
                }
            }
        }

        info!("Removed {} orphaned chunks", removed);
        Ok(removed)
    }
}

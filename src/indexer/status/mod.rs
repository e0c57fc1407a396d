// Mirrors job progress into the documents table


use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use super::queue::{IndexJob, JobExecutor, JobOutcome};
use crate::Result;
use crate::database::sqlite::{Database, DocumentUpdate, IndexStatus};

/// Wraps an executor and records `indexing`, `indexed`, `empty` or `failed` on the
/// document row. Status writes never change the job's own result.
pub struct StatusTrackingExecutor {
    inner: Arc<dyn JobExecutor>,
    database: Database,
}

impl StatusTrackingExecutor {
    #[inline]
    pub fn new(inner: Arc<dyn JobExecutor>, database: Database) -> Self {
        Self { inner, database }
    }

    async fn record(&self, document_id: i64, update: DocumentUpdate) {
        if let Err(e) = self.database.update_document(document_id, &update).await {
            warn!(
                "Failed to record status {:?} for document {}: {:#}",
                update.index_status, document_id, e
            );
        }
    }

    async fn mark_started(&self, document_id: i64) {
        if let Err(e) = self.database.clear_document_error(document_id).await {
            warn!(
                "Failed to clear previous error of document {}: {:#}",
                document_id, e
            );
        }

        self.record(
            document_id,
            DocumentUpdate {
                index_status: Some(IndexStatus::Indexing),
                ..DocumentUpdate::default()
            },
        )
        .await;
    }
}

#[async_trait]
impl JobExecutor for StatusTrackingExecutor {
    async fn execute(&self, job: &IndexJob) -> Result<JobOutcome> {
        let IndexJob::Ingest { document_id, .. } = job else {
            return self.inner.execute(job).await;
        };
        let document_id = *document_id;

        self.mark_started(document_id).await;

        let result = self.inner.execute(job).await;

        let update = match &result {
            Ok(JobOutcome::Ingested(stats)) => DocumentUpdate {
                index_status: Some(if stats.records_written > 0 {
                    IndexStatus::Indexed
                } else {
                    IndexStatus::Empty
                }),
                chunk_count: Some(stats.records_written as i64),
                indexed_date: Some(Utc::now().naive_utc()),
                ..DocumentUpdate::default()
            },
            Ok(JobOutcome::Deleted(_)) => return result,
            Err(e) => DocumentUpdate {
                index_status: Some(IndexStatus::Failed),
                error_message: Some(e.to_string()),
                ..DocumentUpdate::default()
            },
        };

        self.record(document_id, update).await;
        result
    }
}

impl std::fmt::Debug for StatusTrackingExecutor {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTrackingExecutor")
            .finish_non_exhaustive()
    }
}

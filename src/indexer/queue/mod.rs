// Background job queue for ingestion and vector deletion
// Callers only wait for enqueueing; failures are visible through logs and QueueStats


use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::IngestionStats;
use crate::config::IndexerConfig;
use crate::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexJob {
    Ingest {
        document_id: i64,
        owner_user_id: i64,
        text: String,
    },
    DeleteVectors {
        document_id: i64,
        owner_user_id: i64,
    },
}

impl IndexJob {
    #[inline]
    pub fn document_id(&self) -> i64 {
        match self {
            IndexJob::Ingest { document_id, .. } | IndexJob::DeleteVectors { document_id, .. } => {
                *document_id
            }
        }
    }

    #[inline]
    pub fn owner_user_id(&self) -> i64 {
        match self {
            IndexJob::Ingest { owner_user_id, .. }
            | IndexJob::DeleteVectors { owner_user_id, .. } => *owner_user_id,
        }
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            IndexJob::Ingest { .. } => "ingest",
            IndexJob::DeleteVectors { .. } => "delete",
        }
    }

    fn scope(&self) -> (i64, i64) {
        (self.owner_user_id(), self.document_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Ingested(IngestionStats),
    Deleted(u64),
}

/// Runs one job. Wrappers around an executor can add retry, status tracking or metrics.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &IndexJob) -> Result<JobOutcome>;
}

/// Snapshot of the queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    /// Jobs accepted but not yet started
    #[inline]
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.running + self.completed + self.failed)
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    submitted: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl QueueCounters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Sending side of the background indexer
#[derive(Debug)]
pub struct IndexerHandle {
    sender: mpsc::Sender<IndexJob>,
    counters: Arc<QueueCounters>,
    worker: JoinHandle<()>,
}

/// Start the worker task. Must be called inside a Tokio runtime.
#[inline]
pub fn spawn_indexer(executor: Arc<dyn JobExecutor>, config: &IndexerConfig) -> IndexerHandle {
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let counters = Arc::new(QueueCounters::default());
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

    info!(
        "Starting background indexer: {} concurrent jobs, queue capacity {}",
        config.max_concurrent_jobs, config.queue_capacity
    );

    let worker = tokio::spawn(run_worker(receiver, executor, semaphore, Arc::clone(&counters)));

    IndexerHandle {
        sender,
        counters,
        worker,
    }
}

impl IndexerHandle {
    /// Enqueue `job`, waiting only while the queue is full
    #[inline]
    pub async fn submit(&self, job: IndexJob) -> Result<()> {
        debug!(
            "Queueing {} job for document {}",
            job.kind(),
            job.document_id()
        );

        self.sender
            .send(job)
            .await
            .map_err(|e| {
                RagError::Other(anyhow::anyhow!(
                    "Indexer queue is closed, dropped {} job for document {}",
                    e.0.kind(),
                    e.0.document_id()
                ))
            })?;

        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[inline]
    pub async fn ingest(&self, document_id: i64, owner_user_id: i64, text: String) -> Result<()> {
        self.submit(IndexJob::Ingest {
            document_id,
            owner_user_id,
            text,
        })
        .await
    }

    #[inline]
    pub async fn delete_document_vectors(&self, document_id: i64, owner_user_id: i64) -> Result<()> {
        self.submit(IndexJob::DeleteVectors {
            document_id,
            owner_user_id,
        })
        .await
    }

    #[inline]
    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    /// Stop accepting jobs and wait until every accepted job has finished
    #[inline]
    pub async fn shutdown(self) -> QueueStats {
        let Self {
            sender,
            counters,
            worker,
        } = self;
        drop(sender);

        if let Err(e) = worker.await {
            error!("Indexer worker terminated abnormally: {}", e);
        }

        let stats = counters.snapshot();
        info!(
            "Background indexer stopped: {} completed, {} failed",
            stats.completed, stats.failed
        );
        stats
    }
}

/// Jobs for the same `(owner, document)` run one after another in submission order.
/// Each job waits on a receiver whose sender is dropped when the previous job of its
/// scope finishes, so a delete never overlaps an ingest of the same document.
async fn run_worker(
    mut receiver: mpsc::Receiver<IndexJob>,
    executor: Arc<dyn JobExecutor>,
    semaphore: Arc<Semaphore>,
    counters: Arc<QueueCounters>,
) {
    let mut tasks = JoinSet::new();
    let mut scope_tails: HashMap<(i64, i64), oneshot::Receiver<()>> = HashMap::new();

    while let Some(job) = receiver.recv().await {
        while let Some(result) = tasks.try_join_next() {
            record_join(result, &counters);
        }
        scope_tails.retain(|_, tail| matches!(tail.try_recv(), Err(TryRecvError::Empty)));

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Indexer semaphore closed: {}", e);
                break;
            }
        };

        let (done, tail) = oneshot::channel::<()>();
        let previous = scope_tails.insert(job.scope(), tail);

        let executor = Arc::clone(&executor);
        let counters = Arc::clone(&counters);
        tasks.spawn(async move {
            let _permit = permit;
            let _done = done;

            if let Some(previous) = previous {
                debug!(
                    "Waiting for earlier job on document {} before {}",
                    job.document_id(),
                    job.kind()
                );
                // Resolves with an error once the earlier job drops its sender
                previous.await.ok();
            }

            counters.running.fetch_add(1, Ordering::SeqCst);
            let started = Instant::now();

            match executor.execute(&job).await {
                Ok(outcome) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "Finished {} job for document {} in {:?}: {:?}",
                        job.kind(),
                        job.document_id(),
                        started.elapsed(),
                        outcome
                    );
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    error!(
                        "{} job for document {} of user {} failed: {}",
                        job.kind(),
                        job.document_id(),
                        job.owner_user_id(),
                        e
                    );
                }
            }

            counters.running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    debug!("Indexer queue closed, waiting for {} running jobs", tasks.len());
    while let Some(result) = tasks.join_next().await {
        record_join(result, &counters);
    }
}

fn record_join(result: std::result::Result<(), JoinError>, counters: &QueueCounters) {
    if let Err(e) = result {
        warn!("Indexing task panicked: {}", e);
        counters.running.fetch_sub(1, Ordering::SeqCst);
        counters.failed.fetch_add(1, Ordering::SeqCst);
    }
}

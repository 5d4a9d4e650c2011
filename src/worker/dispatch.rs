//! Dispatch layer for routing jobs to per-repo workers.
//!
//! The dispatcher routes each classified delivery to its repository's worker,
//! creating the worker when the first delivery for a repository arrives.
//! Different repositories are processed concurrently; deliveries for a single
//! repository are run one at a time, in arrival order.
//!
//! ```text
//!                                          ┌──────────────────────┐
//!                                     ┌──► │  repo A queue (FIFO) │ ──► worker A
//! ┌─────────────┐     ┌──────────┐    │    └──────────────────────┘
//! │   axum      │ ──► │ dispatch │ ───┤
//! │  (accepts)  │     │ by repo  │    │    ┌──────────────────────┐
//! └─────────────┘     └──────────┘    └──► │  repo B queue (FIFO) │ ──► worker B
//!       │                                  └──────────────────────┘
//!       │ returns 202 Accepted, or 503 when the queue is full
//!       ▼
//! ```
//!
//! Queues are bounded and in memory. A full queue rejects the delivery
//! immediately instead of making the webhook request wait; GitHub then shows
//! the delivery as failed and it can be redelivered from the repository's
//! webhook settings.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::feedback::Reporter;
use crate::terraform::Executor;
use crate::types::RepoId;

use super::message::{Job, WorkerMessage};
use super::pipeline::Pipeline;
use super::worker::RepoWorker;

/// Default number of deliveries that may wait per repository.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Errors that can occur during dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The repository's queue is at capacity.
    #[error("queue for {0} is full")]
    QueueFull(RepoId),

    /// The worker exited and could not be replaced.
    #[error("worker for {0} is not accepting jobs")]
    ChannelClosed(RepoId),

    /// Shutdown has begun; no new jobs are accepted.
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Per-repo worker handle.
struct WorkerHandle {
    /// Sending half of the repository's queue.
    tx: mpsc::Sender<WorkerMessage>,

    /// Handle to the worker's async task.
    task: JoinHandle<()>,

}

/// Routes jobs to per-repo workers.
///
/// Thread-safe; shared across HTTP handler tasks behind an `Arc`.
pub struct Dispatcher<E, R> {
    pipeline: Arc<Pipeline<E, R>>,

    queue_capacity: usize,

    /// Active workers, keyed by repository ID.
    workers: RwLock<HashMap<RepoId, WorkerHandle>>,

    /// Global shutdown token.
    shutdown: CancellationToken,
}

impl<E, R> Dispatcher<E, R>
where
    E: Executor + Send + Sync + 'static,
    R: Reporter + Send + Sync + 'static,
{
    /// Creates a dispatcher whose workers share `pipeline`.
    pub fn new(pipeline: Pipeline<E, R>, queue_capacity: usize) -> Self {
        Self::new_with_shutdown(pipeline, queue_capacity, CancellationToken::new())
    }

    /// Creates a dispatcher driven by an external shutdown token.
    pub fn new_with_shutdown(
        pipeline: Pipeline<E, R>,
        queue_capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        info!(queue_capacity, "Creating dispatcher");

        Dispatcher {
            pipeline: Arc::new(pipeline),
            // mpsc::channel panics on zero.
            queue_capacity: queue_capacity.max(1),
            workers: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Queues a job on its repository's worker without waiting.
    #[instrument(skip(self, job), fields(repo = %job.event.repo(), delivery = %job.delivery_label()))]
    pub async fn dispatch(&self, job: Job) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }

        let repo = job.event.repo().clone();
        let tx = self.get_or_spawn_worker(&repo).await;

        let job = match tx.try_send(WorkerMessage::Job(job)) {
            Ok(()) => {
                trace!("Job queued");
                return Ok(());
            }
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.queue_capacity, "Repository queue is full");
                return Err(DispatchError::QueueFull(repo));
            }
            Err(TrySendError::Closed(msg)) => msg,
        };

        // The worker has gone away; replace it once.
        debug!("Worker channel closed, respawning");
        self.workers.write().await.remove(&repo);
        let tx = self.get_or_spawn_worker(&repo).await;
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull(repo.clone()),
            TrySendError::Closed(_) => DispatchError::ChannelClosed(repo.clone()),
        })
    }

    /// Gets an existing worker's sender or spawns a new worker task.
    async fn get_or_spawn_worker(&self, repo: &RepoId) -> mpsc::Sender<WorkerMessage> {
        // First, try to get existing worker (read lock)
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(repo) {
                return handle.tx.clone();
            }
        }

        // Worker doesn't exist, need to create one (write lock)
        let mut workers = self.workers.write().await;

        // Double-check after acquiring write lock
        if let Some(handle) = workers.get(repo) {
            return handle.tx.clone();
        }

        debug!(repo = %repo, "Spawning new worker task");
        let worker = RepoWorker::new(repo.clone(), Arc::clone(&self.pipeline));

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let task = tokio::spawn(worker.run(rx, self.shutdown.child_token()));

        workers.insert(
            repo.clone(),
            WorkerHandle {
                tx: tx.clone(),
                task,
            },
        );

        tx
    }

    /// Returns the number of active workers.
    #[cfg(test)]
    pub(crate) async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    #[cfg(test)]
    async fn has_worker(&self, repo: &RepoId) -> bool {
        self.workers.read().await.contains_key(repo)
    }

    /// Stops every worker and waits for them to exit.
    ///
    /// Cancellation reaches in-flight terraform processes, so this returns
    /// once each worker's current job has wound down.
    pub async fn shutdown_all(&self) {
        info!("Shutting down all workers");
        self.shutdown.cancel();

        let handles: Vec<_> = self.workers.write().await.drain().collect();
        for (repo, handle) in handles {
            trace!(repo = %repo, "Waiting for worker to stop");
            let _ = handle.tx.try_send(WorkerMessage::Shutdown);
            if let Err(e) = handle.task.await {
                warn!(repo = %repo, error = %e, "Worker task panicked");
            }
        }

        info!("All workers stopped");
    }
}

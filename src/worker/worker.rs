//! Per-repository worker.
//!
//! Each worker owns the receiving end of its repository's queue and runs jobs
//! strictly one at a time. A failed job is logged and the worker moves on;
//! nothing a delivery does can stop the worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::feedback::Reporter;
use crate::terraform::Executor;
use crate::types::RepoId;

use super::message::{Job, WorkerMessage};
use super::pipeline::{Outcome, Pipeline, PipelineError};

/// Serial executor of jobs for one repository.
pub struct RepoWorker<E, R> {
    repo: RepoId,
    pipeline: Arc<Pipeline<E, R>>,
}

impl<E, R> RepoWorker<E, R>
where
    E: Executor + Send + Sync,
    R: Reporter + Send + Sync,
{
    pub fn new(repo: RepoId, pipeline: Arc<Pipeline<E, R>>) -> Self {
        RepoWorker { repo, pipeline }
    }

    /// Runs the worker's event loop until shutdown or until every sender is
    /// dropped.
    ///
    /// `shutdown` is also handed to the pipeline, so cancelling it kills an
    /// in-flight terraform process.
    #[instrument(skip_all, fields(repo = %self.repo))]
    pub async fn run(self, mut rx: mpsc::Receiver<WorkerMessage>, shutdown: CancellationToken) {
        info!("Worker event loop started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(WorkerMessage::Job(job)) => self.process(job, &shutdown).await,
                        Some(WorkerMessage::Shutdown) => {
                            info!("Shutdown message received");
                            break;
                        }
                        None => {
                            info!("Message channel closed");
                            break;
                        }
                    }
                }
            }
        }

        let abandoned = rx.len();
        if abandoned > 0 {
            warn!(abandoned, "Worker stopped with queued jobs");
        }
    }

    async fn process(&self, job: Job, shutdown: &CancellationToken) {
        let delivery = job.delivery_label();

        match self.pipeline.handle(&job.event, shutdown).await {
            Ok(Outcome::Reported { command, success }) => {
                info!(%delivery, %command, success, "Delivery reported");
            }
            Ok(Outcome::Ignored) => {
                info!(%delivery, "Delivery ignored");
            }
            Err(e) => {
                let retriable = match &e {
                    PipelineError::CheckRun(source) | PipelineError::Comment { source, .. } => {
                        source.kind.is_retriable()
                    }
                    PipelineError::Checkout(_) | PipelineError::Config(_) => false,
                };
                error!(%delivery, error = %e, retriable, "Delivery failed");
            }
        }
    }
}

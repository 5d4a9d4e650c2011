//! The per-delivery pipeline: checkout, config, terraform, report.
//!
//! The clone lease is taken first and released last, so for one repository
//! the whole sequence is a single critical section. A failure at any step
//! ends the delivery; nothing is retried.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::feedback::{self, Reporter};
use crate::git::{GitError, RepoStore};
use crate::github::GitHubApiError;
use crate::repo_config::{self, ConfigError};
use crate::terraform::Executor;
use crate::types::{CommandKind, PrNumber};
use crate::webhooks::TriggerEvent;

/// Errors that end a delivery.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Clone, fetch or checkout failed. No feedback is sent.
    #[error("checkout failed: {0}")]
    Checkout(#[from] GitError),

    /// The repository's `.tellus` file could not be used. No feedback is sent.
    #[error("repository config: {0}")]
    Config(#[from] ConfigError),

    /// Terraform ran but the check run could not be created.
    #[error("failed to create check run: {0}")]
    CheckRun(#[source] GitHubApiError),

    /// The check run was created but the PR comment was not.
    #[error("failed to comment on {pr}: {source}")]
    Comment {
        pr: PrNumber,
        #[source]
        source: GitHubApiError,
    },
}

/// How a delivery ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Terraform ran and the result was posted.
    Reported { command: CommandKind, success: bool },

    /// The event did not apply to this repository's configuration.
    Ignored,
}

/// Runs deliveries against the shared clone store.
pub struct Pipeline<E, R> {
    store: Arc<RepoStore>,
    executor: E,
    reporter: R,
}

impl<E, R> Pipeline<E, R>
where
    E: Executor + Send + Sync,
    R: Reporter + Send + Sync,
{
    pub fn new(store: Arc<RepoStore>, executor: E, reporter: R) -> Self {
        Pipeline {
            store,
            executor,
            reporter,
        }
    }

    /// Handles one delivery end to end.
    #[instrument(skip_all, fields(event = %event))]
    pub async fn handle(
        &self,
        event: &TriggerEvent,
        cancel: &CancellationToken,
    ) -> Result<Outcome, PipelineError> {
        let repo = event.repo();
        let head_sha = event.head_sha();

        let lease = self.store.acquire(repo).await;
        let clone = lease.prepare(head_sha).await?;
        let config = repo_config::resolve(&clone.path)?;

        let Some(command) = event.resolve(&config) else {
            info!(
                tracked_ref = %config.tracked_ref(),
                "Event does not target the tracked branch, ignoring"
            );
            return Ok(Outcome::Ignored);
        };

        let terraform_dir = config.terraform_dir(&clone.path)?;
        let result = self.executor.run(command, &terraform_dir, cancel).await;

        feedback::report_status(&self.reporter, repo, head_sha, command, &result)
            .await
            .map_err(PipelineError::CheckRun)?;

        if let Some(pr) = event.comment_target() {
            feedback::report_comment(&self.reporter, repo, pr, &result.output)
                .await
                .map_err(|source| PipelineError::Comment { pr, source })?;
        }

        drop(lease);

        Ok(Outcome::Reported {
            command,
            success: result.success,
        })
    }
}

//! Typed webhook events.
//!
//! A [`TriggerEvent`] is a delivery that may lead to a terraform run. Whether
//! it actually does, and which command runs, depends on the repository's
//! configuration, which only exists inside the checked-out tree. That final
//! decision is [`TriggerEvent::resolve`].

use std::fmt;

use crate::repo_config::RepoConfig;
use crate::types::{CommandKind, PrNumber, RepoId, Sha};

/// A delivery that needs a checkout before it can be classified further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Any `pull_request` delivery. Every action is a plan trigger.
    PullRequest {
        repo: RepoId,
        head_sha: Sha,
        pr_number: PrNumber,
    },

    /// A `push` delivery that created or moved a ref.
    Push {
        repo: RepoId,
        head_sha: Sha,
        /// The full ref, e.g. `refs/heads/master`.
        git_ref: String,
    },

    /// A `check_run` delivery with action `rerequested`.
    CheckRunRerequested {
        repo: RepoId,
        head_sha: Sha,
        /// The check suite's head branch. GitHub omits it for commits not at
        /// the tip of any branch.
        head_branch: Option<String>,
    },
}

impl TriggerEvent {
    /// Returns the repository the event belongs to.
    pub fn repo(&self) -> &RepoId {
        match self {
            TriggerEvent::PullRequest { repo, .. }
            | TriggerEvent::Push { repo, .. }
            | TriggerEvent::CheckRunRerequested { repo, .. } => repo,
        }
    }

    /// Returns the commit to check out.
    pub fn head_sha(&self) -> &Sha {
        match self {
            TriggerEvent::PullRequest { head_sha, .. }
            | TriggerEvent::Push { head_sha, .. }
            | TriggerEvent::CheckRunRerequested { head_sha, .. } => head_sha,
        }
    }

    /// Returns the pull request to comment on, if any.
    ///
    /// Only pull request deliveries get a comment. A re-run check reports
    /// through the check run alone.
    pub fn comment_target(&self) -> Option<PrNumber> {
        match self {
            TriggerEvent::PullRequest { pr_number, .. } => Some(*pr_number),
            _ => None,
        }
    }

    /// Decides which command to run, given the repository's configuration.
    ///
    /// Returns `None` when the event turns out to be irrelevant: a push to a
    /// branch other than the tracked one.
    pub fn resolve(&self, config: &RepoConfig) -> Option<CommandKind> {
        match self {
            TriggerEvent::PullRequest { .. } => Some(CommandKind::Plan),
            TriggerEvent::Push { git_ref, .. } => {
                (*git_ref == config.tracked_ref()).then_some(CommandKind::Apply)
            }
            TriggerEvent::CheckRunRerequested { head_branch, .. } => {
                if head_branch.as_deref() == Some(config.tracked_branch.as_str()) {
                    Some(CommandKind::Apply)
                } else {
                    Some(CommandKind::Plan)
                }
            }
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            TriggerEvent::PullRequest { .. } => "pull_request",
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::CheckRunRerequested { .. } => "check_run",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@{}",
            self.kind_name(),
            self.repo(),
            self.head_sha().short()
        )
    }
}

//! Local git operations for keeping per-repository clones current.
//!
//! Tellus never edits history; it only needs a working tree at an exact commit.
//! Every checkout is a forced, detached checkout followed by a clean, so a
//! clone's tree always matches the requested commit regardless of what the
//! previous run left behind.
//!
//! git is driven as a subprocess with an explicit working directory. Nothing
//! here changes the process-wide current directory.

pub mod store;

use std::path::Path;
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

pub use store::{CloneLease, DEFAULT_REMOTE_BASE, LocalClone, RepoStore};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// IO error (including failure to spawn git).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking git task panicked or was cancelled.
    #[error("git task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Create a git Command with clean environment (no system/user config).
///
/// This ensures consistent behavior across different machines by ignoring
/// system and user git configuration (e.g., hooks, aliases).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");

    // Never block on a credential prompt.
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a GitError carrying git's stderr
/// verbatim on failure.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command and return stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Clone `url` into `dest`, which must not exist yet.
///
/// `parent` is the directory git runs in; it must exist.
pub fn clone(parent: &Path, url: &str, dest: &Path) -> GitResult<()> {
    let dest = dest.to_string_lossy();
    run_git_sync(parent, &["clone", "--quiet", "--no-checkout", url, &dest])?;
    Ok(())
}

/// Fetch branches and pull request heads from origin, pruning deleted ones.
///
/// Pull request heads are fetched too because a PR opened from a fork has a
/// head commit that no branch of origin contains.
pub fn fetch(workdir: &Path) -> GitResult<()> {
    run_git_sync(
        workdir,
        &[
            "fetch",
            "--quiet",
            "--prune",
            "origin",
            "+refs/heads/*:refs/remotes/origin/*",
            "+refs/pull/*/head:refs/remotes/origin/pull/*",
        ],
    )?;
    Ok(())
}

/// Force the working tree to `commit` in detached HEAD mode.
///
/// Local modifications are discarded and untracked files are removed.
/// Ignored files (such as `.terraform/` provider caches) are kept.
pub fn checkout_force(workdir: &Path, commit: &Sha) -> GitResult<()> {
    run_git_sync(
        workdir,
        &["checkout", "--quiet", "--force", "--detach", commit.as_str()],
    )?;
    run_git_sync(workdir, &["clean", "-ffd", "--quiet"])?;
    Ok(())
}

/// Get the SHA that HEAD points at.
pub fn head(workdir: &Path) -> GitResult<String> {
    run_git_stdout(workdir, &["rev-parse", "HEAD"])
}

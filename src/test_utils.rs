//! Shared test utilities: a local upstream git repository, recording doubles
//! for the executor and reporter, and arbitrary generators for property-based
//! testing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tempfile::TempDir;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use crate::feedback::{CheckRunReport, Reporter};
use crate::git::{head, run_git_sync};
use crate::github::GitHubApiError;
use crate::terraform::{ExecutionResult, Executor};
use crate::types::{CommandKind, PrNumber, RepoId, Sha};

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(|s| Sha::parse(s).unwrap())
}

pub fn arb_repo_id() -> impl Strategy<Value = RepoId> {
    ("[a-z][a-z0-9-]{0,15}", "[a-z][a-z0-9._-]{0,15}").prop_map(|(o, r)| RepoId::new(o, r))
}

// ─── Upstream repository ──────────────────────────────────────────────────────

/// An upstream repository that the store clones from.
///
/// Lives at `<dir>/<owner>/<name>`, so `dir` works as a store's remote base.
pub struct Upstream {
    pub dir: TempDir,
    pub repo: RepoId,
}

impl Upstream {
    pub fn new(owner: &str, name: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = RepoId::new(owner, name);
        let work = dir.path().join(owner).join(name);
        std::fs::create_dir_all(&work).unwrap();
        run_git_sync(&work, &["init", "--quiet"]).unwrap();
        run_git_sync(&work, &["symbolic-ref", "HEAD", "refs/heads/master"]).unwrap();
        run_git_sync(&work, &["config", "user.email", "test@test.com"]).unwrap();
        run_git_sync(&work, &["config", "user.name", "Test"]).unwrap();
        Upstream { dir, repo }
    }

    pub fn remote_base(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join(&self.repo.owner).join(&self.repo.repo)
    }

    /// Writes files and commits them, returning the new commit.
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> Sha {
        let work = self.work_dir();
        for (name, contents) in files {
            let file = work.join(name);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(file, contents).unwrap();
        }
        run_git_sync(&work, &["add", "--all"]).unwrap();
        run_git_sync(&work, &["commit", "--quiet", "-m", message]).unwrap();
        Sha::parse(head(&work).unwrap()).unwrap()
    }
}

// ─── Recording executor ──────────────────────────────────────────────────────

/// One call to [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub kind: CommandKind,
    pub dir: PathBuf,
    /// Contents of `main.tf` in `dir` at the time of the call.
    pub main_tf: Option<String>,
}

/// An executor that records calls instead of running terraform.
#[derive(Clone)]
pub struct RecordingExecutor {
    pub calls: Arc<Mutex<Vec<ExecCall>>>,
    /// Shared with a [`RecordingReporter`] to check phase ordering.
    pub log: Arc<Mutex<Vec<String>>>,
    pub output: String,
    pub success: bool,
    pub delay: Option<Duration>,
    /// When set, each run waits here, so a test can prove runs overlap.
    pub barrier: Option<Arc<Barrier>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl RecordingExecutor {
    pub fn new(output: &str, success: bool) -> Self {
        RecordingExecutor {
            calls: Arc::default(),
            log: Arc::default(),
            output: output.to_string(),
            success,
            delay: None,
            barrier: None,
            active: Arc::default(),
            max_active: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The largest number of runs that were in progress at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Executor for RecordingExecutor {
    async fn run(
        &self,
        kind: CommandKind,
        workdir: &Path,
        _cancel: &CancellationToken,
    ) -> ExecutionResult {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        self.log.lock().unwrap().push(format!("run {kind}"));
        self.calls.lock().unwrap().push(ExecCall {
            kind,
            dir: workdir.to_path_buf(),
            main_tf: std::fs::read_to_string(workdir.join("main.tf")).ok(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let met = match &self.barrier {
            Some(barrier) => tokio::time::timeout(Duration::from_secs(10), barrier.wait())
                .await
                .is_ok(),
            None => true,
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        ExecutionResult {
            output: self.output.clone(),
            success: self.success && met,
        }
    }
}

// ─── Recording reporter ──────────────────────────────────────────────────────

/// One call to [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportCall {
    CheckRun { repo: RepoId, report: CheckRunReport },
    Comment { repo: RepoId, pr: PrNumber, body: String },
}

/// A reporter that records calls and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub calls: Arc<Mutex<Vec<ReportCall>>>,
    pub log: Arc<Mutex<Vec<String>>>,
    pub fail_check_run: bool,
    pub fail_comment: bool,
    pub delay: Option<Duration>,
}

impl RecordingReporter {
    pub fn calls(&self) -> Vec<ReportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn check_runs(&self) -> Vec<CheckRunReport> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ReportCall::CheckRun { report, .. } => Some(report),
                ReportCall::Comment { .. } => None,
            })
            .collect()
    }

    pub fn comments(&self) -> Vec<(PrNumber, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ReportCall::Comment { pr, body, .. } => Some((pr, body)),
                ReportCall::CheckRun { .. } => None,
            })
            .collect()
    }
}

impl Reporter for RecordingReporter {
    async fn create_check_run(
        &self,
        repo: &RepoId,
        report: CheckRunReport,
    ) -> Result<(), GitHubApiError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_check_run {
            return Err(GitHubApiError::transient_without_source("server error"));
        }
        self.log.lock().unwrap().push(format!("check {}", report.title));
        self.calls.lock().unwrap().push(ReportCall::CheckRun {
            repo: repo.clone(),
            report,
        });
        Ok(())
    }

    async fn create_comment(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        body: String,
    ) -> Result<(), GitHubApiError> {
        if self.fail_comment {
            return Err(GitHubApiError::permanent_without_source(
                "Resource not accessible by integration",
            ));
        }
        self.log.lock().unwrap().push(format!("comment {pr}"));
        self.calls.lock().unwrap().push(ReportCall::Comment {
            repo: repo.clone(),
            pr,
            body,
        });
        Ok(())
    }
}

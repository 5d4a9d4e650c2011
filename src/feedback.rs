//! Reporting execution results back to GitHub.
//!
//! Every run produces a completed check run on the commit. Runs triggered by a
//! pull request also get a comment carrying the plan output, so reviewers see
//! it inline. The two calls are independent: if the comment fails after the
//! check run was created, the check run stays.

use std::borrow::Cow;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::github::{GitHubApiError, OctocrabReporter};
use crate::terraform::ExecutionResult;
use crate::types::{CommandKind, PrNumber, RepoId, Sha};

/// GitHub rejects check-run output text longer than this many characters.
pub const CHECK_RUN_TEXT_LIMIT: usize = 65_535;

/// Comment bodies are capped a little lower to leave room for the framing.
pub const COMMENT_OUTPUT_LIMIT: usize = 65_000;

const TRUNCATION_SUFFIX: &str = "\n... (output truncated)";

/// Check-run conclusion, derived only from the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Conclusion {
    Success,
    Failure,
}

impl Conclusion {
    pub fn from_success(success: bool) -> Self {
        if success {
            Conclusion::Success
        } else {
            Conclusion::Failure
        }
    }

    /// The value GitHub expects in the `conclusion` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
        }
    }
}

/// A completed check run, ready to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRunReport {
    pub name: String,
    pub head_sha: Sha,
    pub conclusion: Conclusion,
    pub title: String,
    pub summary: String,
    pub text: String,
    pub completed_at: DateTime<Utc>,
}

impl CheckRunReport {
    /// Builds the check run for a finished terraform command.
    pub fn new(head_sha: Sha, kind: CommandKind, result: &ExecutionResult) -> Self {
        CheckRunReport {
            name: check_run_name(kind),
            head_sha,
            conclusion: Conclusion::from_success(result.success),
            title: format!("Tellus: {kind}"),
            summary: format!("Tellus have run terraform {kind}"),
            text: truncate_output(&result.output, CHECK_RUN_TEXT_LIMIT).into_owned(),
            completed_at: Utc::now(),
        }
    }
}

/// The check-run name shown in GitHub's checks tab.
pub fn check_run_name(kind: CommandKind) -> String {
    format!("Tellus have run terraform {kind}")
}

/// Formats the pull-request comment for a plan's output.
///
/// The fence is longer than any backtick run in the output, so the output
/// cannot close it early.
pub fn comment_body(output: &str) -> String {
    let output = truncate_output(output.trim_end_matches('\n'), COMMENT_OUTPUT_LIMIT);
    let fence = "`".repeat(longest_backtick_run(&output).max(2) + 1);
    format!("Tellus ran `terraform plan` on this PR and got:\n{fence}\n{output}\n{fence}")
}

fn longest_backtick_run(text: &str) -> usize {
    text.split(|c| c != '`').map(str::len).max().unwrap_or(0)
}

/// Caps `output` at `limit` characters, marking the cut.
///
/// The result, suffix included, never exceeds `limit` characters.
pub fn truncate_output(output: &str, limit: usize) -> Cow<'_, str> {
    if output.chars().count() <= limit {
        return Cow::Borrowed(output);
    }

    let suffix_len = TRUNCATION_SUFFIX.chars().count();
    let keep = limit.saturating_sub(suffix_len);
    let cut = output
        .char_indices()
        .nth(keep)
        .map_or(output.len(), |(idx, _)| idx);

    let mut truncated = String::with_capacity(cut + TRUNCATION_SUFFIX.len());
    truncated.push_str(&output[..cut]);
    truncated.push_str(TRUNCATION_SUFFIX);
    Cow::Owned(truncated)
}

/// Posts results to GitHub.
///
/// Implementations make exactly one attempt per call; failures go back to the
/// caller.
pub trait Reporter {
    fn create_check_run(
        &self,
        repo: &RepoId,
        report: CheckRunReport,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;

    fn create_comment(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        body: String,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;
}

/// Posts the check run for `result` on `head_sha`.
pub async fn report_status<R: Reporter>(
    reporter: &R,
    repo: &RepoId,
    head_sha: &Sha,
    kind: CommandKind,
    result: &ExecutionResult,
) -> Result<(), GitHubApiError> {
    let report = CheckRunReport::new(head_sha.clone(), kind, result);
    reporter.create_check_run(repo, report).await
}

/// Posts the plan output as a comment on `pr`.
pub async fn report_comment<R: Reporter>(
    reporter: &R,
    repo: &RepoId,
    pr: PrNumber,
    output: &str,
) -> Result<(), GitHubApiError> {
    reporter.create_comment(repo, pr, comment_body(output)).await
}

/// A reporter that logs what it would post and posts nothing.
///
/// Used when no GitHub credentials are configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingReporter;

impl Reporter for LoggingReporter {
    async fn create_check_run(
        &self,
        repo: &RepoId,
        report: CheckRunReport,
    ) -> Result<(), GitHubApiError> {
        info!(
            repo = %repo,
            sha = %report.head_sha,
            name = %report.name,
            conclusion = report.conclusion.as_str(),
            text_len = report.text.len(),
            "LoggingReporter: check run logged (not posted)"
        );
        Ok(())
    }

    async fn create_comment(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        body: String,
    ) -> Result<(), GitHubApiError> {
        info!(
            repo = %repo,
            pr = %pr,
            body_len = body.len(),
            "LoggingReporter: comment logged (not posted)"
        );
        Ok(())
    }
}

/// The reporter picked at startup: GitHub when a token is configured,
/// logging otherwise.
#[derive(Debug)]
pub enum ServiceReporter {
    GitHub(OctocrabReporter),
    DryRun(LoggingReporter),
}

impl Reporter for ServiceReporter {
    async fn create_check_run(
        &self,
        repo: &RepoId,
        report: CheckRunReport,
    ) -> Result<(), GitHubApiError> {
        match self {
            ServiceReporter::GitHub(r) => r.create_check_run(repo, report).await,
            ServiceReporter::DryRun(r) => r.create_check_run(repo, report).await,
        }
    }

    async fn create_comment(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        body: String,
    ) -> Result<(), GitHubApiError> {
        match self {
            ServiceReporter::GitHub(r) => r.create_comment(repo, pr, body).await,
            ServiceReporter::DryRun(r) => r.create_comment(repo, pr, body).await,
        }
    }
}

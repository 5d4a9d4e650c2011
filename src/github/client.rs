//! Octocrab-backed reporter.
//!
//! One client serves every repository: calls name the repository explicitly
//! instead of being scoped at construction.

use serde::Serialize;
use tracing::{debug, instrument};

use octocrab::Octocrab;
use octocrab::models::{AppId, InstallationId};

use crate::feedback::{CheckRunReport, Conclusion, Reporter};
use crate::types::{PrNumber, RepoId};

use super::error::GitHubApiError;

/// Body of `POST /repos/{owner}/{repo}/check-runs`.
#[derive(Debug, Serialize)]
struct CreateCheckRunRequest<'a> {
    name: &'a str,
    head_sha: &'a str,
    status: &'static str,
    conclusion: Conclusion,
    completed_at: String,
    output: CheckRunOutput<'a>,
}

#[derive(Debug, Serialize)]
struct CheckRunOutput<'a> {
    title: &'a str,
    summary: &'a str,
    text: &'a str,
}

impl<'a> CreateCheckRunRequest<'a> {
    fn from_report(report: &'a CheckRunReport) -> Self {
        CreateCheckRunRequest {
            name: &report.name,
            head_sha: report.head_sha.as_str(),
            status: "completed",
            conclusion: report.conclusion,
            completed_at: report.completed_at.to_rfc3339(),
            output: CheckRunOutput {
                title: &report.title,
                summary: &report.summary,
                text: &report.text,
            },
        }
    }
}

/// Posts check runs and comments through the GitHub REST API.
#[derive(Clone)]
pub struct OctocrabReporter {
    client: Octocrab,
}

impl OctocrabReporter {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    /// Creates a reporter acting as a GitHub App installation.
    ///
    /// octocrab mints installation tokens from the App's JWT and refreshes
    /// them before they expire. The App needs `checks:write` and
    /// `pull_requests:write`.
    pub fn from_app(
        app_id: u64,
        installation_id: u64,
        private_key_pem: &[u8],
    ) -> Result<Self, GitHubApiError> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem).map_err(|e| {
            GitHubApiError::permanent_without_source(format!(
                "invalid GitHub App private key: {e}"
            ))
        })?;
        let app = Octocrab::builder()
            .app(AppId(app_id), key)
            .build()
            .map_err(GitHubApiError::from_octocrab)?;
        let client = app
            .installation(InstallationId(installation_id))
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(Self::new(client))
    }

    /// Creates a reporter authenticated with a personal or installation token.
    ///
    /// GitHub only lets Apps create check runs, so a personal token is
    /// limited to comments unless it is itself an installation token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, GitHubApiError> {
        let client = Octocrab::builder()
            .personal_token(token.into())
            .build()
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(Self::new(client))
    }
}

impl Reporter for OctocrabReporter {
    #[instrument(skip(self, report), fields(repo = %repo, sha = %report.head_sha))]
    async fn create_check_run(
        &self,
        repo: &RepoId,
        report: CheckRunReport,
    ) -> Result<(), GitHubApiError> {
        let url = format!("/repos/{}/{}/check-runs", repo.owner, repo.repo);
        let body = CreateCheckRunRequest::from_report(&report);

        let result: Result<serde_json::Value, _> = self.client.post(&url, Some(&body)).await;

        match result {
            Ok(_) => {
                debug!(conclusion = report.conclusion.as_str(), "Created check run");
                Ok(())
            }
            Err(e) => Err(GitHubApiError::from_octocrab(e)),
        }
    }

    #[instrument(skip(self, body), fields(repo = %repo, pr = %pr))]
    async fn create_comment(
        &self,
        repo: &RepoId,
        pr: PrNumber,
        body: String,
    ) -> Result<(), GitHubApiError> {
        let result = self
            .client
            .issues(&repo.owner, &repo.repo)
            .create_comment(pr.0, body)
            .await;

        match result {
            Ok(comment) => {
                debug!(comment_id = comment.id.into_inner(), "Posted comment");
                Ok(())
            }
            Err(e) => Err(GitHubApiError::from_octocrab(e)),
        }
    }
}

impl std::fmt::Debug for OctocrabReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabReporter").finish_non_exhaustive()
    }
}

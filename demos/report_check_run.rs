//! Manual check of GitHub reporting against a real repository.
//!
//! Posts a completed check run on a commit and, if a PR is given, a plan
//! comment, exactly as the service would after a run.
//!
//! # Usage
//!
//! 1. Set `GITHUB_TOKEN` to a GitHub App installation token with
//!    `checks:write` and `pull_requests:write` on the target repository.
//!    Personal tokens cannot create check runs.
//! 2. Set `TEST_REPO` (`owner/repo`) and `TEST_SHA` (a full commit SHA in it).
//! 3. Optionally set `TEST_PR` to also post a comment.
//! 4. Optionally set `TEST_TF_DIR` to a terraform directory; its real
//!    `terraform plan` output is posted instead of a canned one.
//! 5. Run: `cargo run --example report_check_run`
//!
//! This performs real API calls and leaves a check run on the commit.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tellus::feedback::{self, Reporter};
use tellus::github::OctocrabReporter;
use tellus::terraform::{ExecutionResult, TerraformRunner};
use tellus::types::{CommandKind, PrNumber, RepoId, Sha};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tellus=debug".into()),
        )
        .init();

    let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;
    let repo = env::var("TEST_REPO").context("TEST_REPO environment variable not set")?;
    let repo = RepoId::parse_full_name(&repo)
        .map_err(|e| anyhow::anyhow!("TEST_REPO must be owner/repo, got {:?}", e.0))?;
    let sha = env::var("TEST_SHA").context("TEST_SHA environment variable not set")?;
    let sha = Sha::parse(&sha).map_err(|e| anyhow::anyhow!("TEST_SHA is not a SHA: {:?}", e.0))?;
    let pr = env::var("TEST_PR")
        .ok()
        .map(|s| s.parse::<u64>().map(PrNumber))
        .transpose()
        .context("TEST_PR must be a number")?;

    let result = match env::var_os("TEST_TF_DIR") {
        Some(dir) => {
            println!("Running terraform plan in {}", PathBuf::from(&dir).display());
            TerraformRunner::default()
                .execute(CommandKind::Plan, &PathBuf::from(dir), &CancellationToken::new())
                .await
        }
        None => ExecutionResult {
            output: "No changes. Your infrastructure matches the configuration.\n".to_string(),
            success: true,
        },
    };

    let reporter = OctocrabReporter::from_token(token)?;

    println!("=== Check run on {repo}@{} ===", sha.short());
    feedback::report_status(&reporter, &repo, &sha, CommandKind::Plan, &result).await?;
    println!("  posted ({})", if result.success { "success" } else { "failure" });

    if let Some(pr) = pr {
        println!("=== Comment on {pr} ===");
        reporter
            .create_comment(&repo, pr, feedback::comment_body(&result.output))
            .await?;
        println!("  posted");
    }

    Ok(())
}

//! Tellus - Terraform CI/CD driven by GitHub webhooks.
//!
//! Pull requests get a `terraform plan`, pushes to the tracked branch get a
//! `terraform apply`, and re-running a check run repeats whichever of the two
//! applies to its branch. Results are posted back as check runs, and plans
//! are also posted as PR comments.

pub mod config;
pub mod feedback;
pub mod git;
pub mod github;
pub mod repo_config;
pub mod server;
pub mod terraform;
pub mod types;
pub mod webhooks;
pub mod worker;

#[cfg(test)]
mod test_utils;

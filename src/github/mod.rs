//! GitHub API client.
//!
//! Implements the `Reporter` trait from the feedback module against the real
//! GitHub API via octocrab. Calls are made once; failures are categorized but
//! never retried.

mod client;
mod error;

pub use client::OctocrabReporter;
pub use error::{GitHubApiError, GitHubErrorKind};

//! GitHub webhook payload parser.
//!
//! Turns an `X-GitHub-Event` kind and raw JSON payload into a [`TriggerEvent`].
//! This stage is pure: it never touches disk or the network.
//!
//! # Parsing Strategy
//!
//! 1. The event kind is taken from the `X-GitHub-Event` header
//! 2. Kinds other than `pull_request`, `push` and `check_run` return `Ok(None)`
//! 3. `check_run` actions other than `rerequested` return `Ok(None)`
//! 4. Branch deletions (`push` with `deleted: true`) return `Ok(None)`
//! 5. Missing required fields or malformed values return `Err`
//!
//! Only the fields tellus needs are deserialized; everything else in GitHub's
//! payloads is skipped.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{PrNumber, RepoId, Sha};

use super::events::TriggerEvent;

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Field has invalid value (e.g., malformed SHA).
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a trigger event.
///
/// * `Ok(Some(event))` - the delivery may trigger a run
/// * `Ok(None)` - the delivery is ignored
/// * `Err(e)` - malformed payload or missing required fields
///
/// # Examples
///
/// ```
/// use tellus::webhooks::parse_webhook;
///
/// let payload = br#"{
///     "ref": "refs/heads/master",
///     "after": "0123456789abcdef0123456789abcdef01234567",
///     "head_commit": { "id": "0123456789abcdef0123456789abcdef01234567" },
///     "repository": {
///         "full_name": "acme/infra",
///         "name": "infra",
///         "owner": { "login": "acme" }
///     }
/// }"#;
///
/// let event = parse_webhook("push", payload).unwrap();
/// assert!(event.is_some());
///
/// assert!(parse_webhook("star", b"{}").unwrap().is_none());
/// ```
pub fn parse_webhook(event_kind: &str, payload: &[u8]) -> Result<Option<TriggerEvent>, ParseError> {
    match event_kind {
        "pull_request" => parse_pull_request(payload).map(Some),
        "push" => parse_push(payload),
        "check_run" => parse_check_run(payload),
        _ => Ok(None),
    }
}

// ============================================================================
// Raw payload structures for deserialization
// ============================================================================

/// Repository info present in all three payloads.
///
/// Push payloads describe the owner with `name` as well as `login`; the other
/// events only carry `login`.
#[derive(Debug, Deserialize)]
struct RawRepository {
    full_name: Option<String>,
    name: String,
    owner: RawOwner,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: Option<String>,
    name: Option<String>,
}

impl RawRepository {
    fn into_repo_id(self) -> Result<RepoId, ParseError> {
        let repo = match self.full_name {
            Some(full_name) => {
                RepoId::parse_full_name(&full_name).map_err(|e| ParseError::InvalidField {
                    field: "repository.full_name",
                    value: e.0,
                })?
            }
            None => {
                let owner = self.owner.login.or(self.owner.name).ok_or_else(|| {
                    ParseError::InvalidField {
                        field: "repository.owner.login",
                        value: String::new(),
                    }
                })?;
                RepoId::new(owner, self.name)
            }
        };

        if !repo.is_valid() {
            return Err(ParseError::InvalidField {
                field: "repository",
                value: repo.to_string(),
            });
        }
        Ok(repo)
    }
}

fn parse_sha(field: &'static str, value: &str) -> Result<Sha, ParseError> {
    Sha::parse(value).map_err(|_| ParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

// ============================================================================
// pull_request event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    number: u64,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    head: RawHead,
}

#[derive(Debug, Deserialize)]
struct RawHead {
    sha: String,
}

fn parse_pull_request(payload: &[u8]) -> Result<TriggerEvent, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    Ok(TriggerEvent::PullRequest {
        head_sha: parse_sha("pull_request.head.sha", &raw.pull_request.head.sha)?,
        pr_number: PrNumber(raw.number),
        repo: raw.repository.into_repo_id()?,
    })
}

// ============================================================================
// push event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    deleted: bool,
    head_commit: Option<RawCommit>,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: String,
}

fn parse_push(payload: &[u8]) -> Result<Option<TriggerEvent>, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;

    // A deleted branch has no commit to apply.
    let head_commit = match raw.head_commit {
        Some(commit) if !raw.deleted => commit,
        _ => return Ok(None),
    };

    Ok(Some(TriggerEvent::Push {
        head_sha: parse_sha("head_commit.id", &head_commit.id)?,
        git_ref: raw.git_ref,
        repo: raw.repository.into_repo_id()?,
    }))
}

// ============================================================================
// check_run event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawCheckRunPayload {
    action: String,
    check_run: RawCheckRun,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawCheckRun {
    head_sha: String,
    check_suite: RawCheckSuite,
}

#[derive(Debug, Deserialize)]
struct RawCheckSuite {
    head_branch: Option<String>,
}

fn parse_check_run(payload: &[u8]) -> Result<Option<TriggerEvent>, ParseError> {
    let raw: RawCheckRunPayload = serde_json::from_slice(payload)?;

    if raw.action != "rerequested" {
        return Ok(None);
    }

    Ok(Some(TriggerEvent::CheckRunRerequested {
        head_sha: parse_sha("check_run.head_sha", &raw.check_run.head_sha)?,
        head_branch: raw.check_run.check_suite.head_branch,
        repo: raw.repository.into_repo_id()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_config::RepoConfig;
    use crate::types::CommandKind;
    use proptest::prelude::*;
    use serde_json::json;

    const SHA: &str = "abcdef1234567890abcdef1234567890abcdef12";

    fn repository() -> serde_json::Value {
        json!({
            "full_name": "acme/infra",
            "name": "infra",
            "owner": { "login": "acme", "id": 1 },
            "private": true
        })
    }

    fn pull_request_payload(action: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "number": 42,
            "pull_request": {
                "number": 42,
                "head": { "sha": SHA, "ref": "feature" },
                "base": { "sha": "1234567890abcdef1234567890abcdef12345678", "ref": "master" }
            },
            "repository": repository()
        }))
        .unwrap()
    }

    fn push_payload(git_ref: &str) -> serde_json::Value {
        json!({
            "ref": git_ref,
            "before": "0000000000000000000000000000000000000000",
            "after": SHA,
            "deleted": false,
            "head_commit": { "id": SHA, "message": "Add bucket" },
            "repository": {
                "full_name": "acme/infra",
                "name": "infra",
                "owner": { "name": "acme", "email": null }
            }
        })
    }

    fn check_run_payload(action: &str, head_branch: Option<&str>) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "check_run": {
                "id": 4,
                "name": "Tellus have run terraform plan",
                "head_sha": SHA,
                "check_suite": { "id": 5, "head_branch": head_branch }
            },
            "repository": repository()
        }))
        .unwrap()
    }

    fn sha() -> Sha {
        Sha::parse(SHA).unwrap()
    }

    #[test]
    fn parse_pull_request_opened() {
        let event = parse_webhook("pull_request", &pull_request_payload("opened"))
            .unwrap()
            .expect("should parse");

        assert_eq!(
            event,
            TriggerEvent::PullRequest {
                repo: RepoId::new("acme", "infra"),
                head_sha: sha(),
                pr_number: PrNumber(42),
            }
        );
    }

    #[test]
    fn every_pull_request_action_is_a_trigger() {
        for action in ["opened", "synchronize", "reopened", "closed", "labeled", "edited"] {
            let event = parse_webhook("pull_request", &pull_request_payload(action)).unwrap();
            assert!(event.is_some(), "{action} should trigger a plan");
        }
    }

    #[test]
    fn parse_push_to_branch() {
        let payload = serde_json::to_vec(&push_payload("refs/heads/master")).unwrap();
        let event = parse_webhook("push", &payload).unwrap().expect("should parse");

        assert_eq!(
            event,
            TriggerEvent::Push {
                repo: RepoId::new("acme", "infra"),
                head_sha: sha(),
                git_ref: "refs/heads/master".to_string(),
            }
        );
    }

    #[test]
    fn push_without_full_name_uses_owner_name() {
        let mut payload = push_payload("refs/heads/master");
        payload["repository"]
            .as_object_mut()
            .unwrap()
            .remove("full_name");

        let event = parse_webhook("push", &serde_json::to_vec(&payload).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(event.repo(), &RepoId::new("acme", "infra"));
    }

    #[test]
    fn branch_deletion_is_ignored() {
        let mut payload = push_payload("refs/heads/old");
        payload["deleted"] = json!(true);
        payload["head_commit"] = json!(null);

        let event = parse_webhook("push", &serde_json::to_vec(&payload).unwrap()).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn parse_check_run_rerequested() {
        let event = parse_webhook("check_run", &check_run_payload("rerequested", Some("master")))
            .unwrap()
            .expect("should parse");

        assert_eq!(
            event,
            TriggerEvent::CheckRunRerequested {
                repo: RepoId::new("acme", "infra"),
                head_sha: sha(),
                head_branch: Some("master".to_string()),
            }
        );
    }

    #[test]
    fn check_run_null_head_branch() {
        let event = parse_webhook("check_run", &check_run_payload("rerequested", None))
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            TriggerEvent::CheckRunRerequested {
                head_branch: None,
                ..
            }
        ));
    }

    #[test]
    fn other_check_run_actions_are_ignored() {
        for action in ["created", "completed", "requested_action"] {
            let event = parse_webhook("check_run", &check_run_payload(action, Some("master")));
            assert!(event.unwrap().is_none(), "{action} should be ignored");
        }
    }

    #[test]
    fn unknown_event_type_returns_none() {
        for kind in ["issue_comment", "ping", "check_suite", "status", ""] {
            assert!(parse_webhook(kind, b"{}").unwrap().is_none());
        }
    }

    #[test]
    fn malformed_json_returns_error() {
        let result = parse_webhook("pull_request", b"not json");
        assert!(matches!(result, Err(ParseError::JsonError(_))));
    }

    #[test]
    fn missing_required_field_returns_error() {
        let payload = serde_json::to_vec(&json!({
            "action": "opened",
            "number": 1,
            "pull_request": { "head": {} },
            "repository": repository()
        }))
        .unwrap();

        assert!(matches!(
            parse_webhook("pull_request", &payload),
            Err(ParseError::JsonError(_))
        ));
    }

    #[test]
    fn missing_repository_returns_error() {
        let payload = serde_json::to_vec(&json!({
            "ref": "refs/heads/master",
            "head_commit": { "id": SHA }
        }))
        .unwrap();

        assert!(parse_webhook("push", &payload).is_err());
    }

    #[test]
    fn invalid_sha_returns_error() {
        let mut payload = push_payload("refs/heads/master");
        payload["head_commit"]["id"] = json!("--upload-pack=evil");

        let result = parse_webhook("push", &serde_json::to_vec(&payload).unwrap());
        assert!(matches!(
            result,
            Err(ParseError::InvalidField {
                field: "head_commit.id",
                ..
            })
        ));
    }

    #[test]
    fn traversal_in_repository_name_returns_error() {
        let mut payload = push_payload("refs/heads/master");
        payload["repository"]["full_name"] = json!("acme/..");

        let result = parse_webhook("push", &serde_json::to_vec(&payload).unwrap());
        assert!(matches!(result, Err(ParseError::InvalidField { .. })));
    }

    #[test]
    fn rerequested_check_run_on_tracked_branch_applies() {
        let config = RepoConfig::default();

        let on_master = parse_webhook("check_run", &check_run_payload("rerequested", Some("master")))
            .unwrap()
            .unwrap();
        let on_feature =
            parse_webhook("check_run", &check_run_payload("rerequested", Some("feature")))
                .unwrap()
                .unwrap();

        assert_eq!(on_master.resolve(&config), Some(CommandKind::Apply));
        assert_eq!(on_feature.resolve(&config), Some(CommandKind::Plan));
    }

    proptest! {
        #[test]
        fn prop_unknown_kinds_are_ignored(kind in "[a-z_]{1,20}", body: Vec<u8>) {
            prop_assume!(!matches!(kind.as_str(), "pull_request" | "push" | "check_run"));
            prop_assert!(parse_webhook(&kind, &body).unwrap().is_none());
        }

        #[test]
        fn prop_non_rerequested_check_runs_ignored(action in "[a-z_]{1,20}") {
            prop_assume!(action != "rerequested");
            let payload = check_run_payload(&action, Some("master"));
            prop_assert!(parse_webhook("check_run", &payload).unwrap().is_none());
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(kind in "pull_request|push|check_run", body: Vec<u8>) {
            let _ = parse_webhook(&kind, &body);
        }
    }
}

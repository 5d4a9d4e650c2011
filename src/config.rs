//! Deployment configuration.
//!
//! Read once at startup from the YAML file named by `CONFIG_FILE`, then
//! adjusted by a few environment variables so secrets can stay out of the
//! file:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `GITHUB_TOKEN` | `github.token` |
//! | `TELLUS_WEBHOOK_SECRET` | `github.webhookSecret` |
//! | `TELLUS_PORT` | `webPort` |
//!
//! ```yaml
//! repositoryRootDirectory: /var/lib/tellus/repositories
//! webPort: 8080
//! terraformBinary: /usr/local/bin/terraform
//! commandTimeoutSecs: 1800
//! github:
//!   privateKey:
//!     location: /config/tellus.private-key.pem
//!   integrationId: 12345
//!   installationId: 678901
//!   webhookSecret: change-me
//! ```
//!
//! Check runs can only be created by a GitHub App, so `privateKey`,
//! `integrationId` and `installationId` are the normal way to authenticate.
//! A plain `token` is accepted when they are absent.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::git::DEFAULT_REMOTE_BASE;
use crate::worker::DEFAULT_QUEUE_CAPACITY;

/// Environment variable naming the config file.
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

/// Config file used when `CONFIG_FILE` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "/config/tellus.yml";

const DEFAULT_WEB_PORT: u16 = 8080;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30 * 60;

/// Errors loading the deployment configuration. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ServiceConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment override could not be used.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ServiceConfigError>;

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Where repository clones live, one directory per `owner/name`.
    pub repository_root_directory: PathBuf,

    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// Base URL repositories are cloned from.
    #[serde(default = "default_remote_base")]
    pub remote_base: String,

    #[serde(default = "default_terraform_binary")]
    pub terraform_binary: PathBuf,

    /// Arguments placed before terraform's own, for wrappers such as
    /// `aws-vault exec prod -- terraform`.
    #[serde(default)]
    pub terraform_leading_args: Vec<String>,

    /// Upper bound on one terraform run, init included.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Deliveries that may wait per repository before new ones get a 503.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub github: GitHubConfig,
}

/// GitHub credentials.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubConfig {
    /// PEM file holding the GitHub App's private key.
    #[serde(default)]
    pub private_key: Option<PrivateKeyConfig>,

    /// The GitHub App ID.
    #[serde(default)]
    pub integration_id: Option<u64>,

    /// The App's installation on the account owning the repositories.
    #[serde(default)]
    pub installation_id: Option<u64>,

    /// Token used when no App is configured. Without either, results are only
    /// logged.
    #[serde(default)]
    pub token: Option<String>,

    /// Shared secret for `X-Hub-Signature-256`. Without one, deliveries are
    /// not verified.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("GitHubConfig")
            .field("private_key", &self.private_key)
            .field("integration_id", &self.integration_id)
            .field("installation_id", &self.installation_id)
            .field("token", &redact(&self.token))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrivateKeyConfig {
    pub location: PathBuf,
}

/// How the reporter authenticates to GitHub.
#[derive(Clone, PartialEq, Eq)]
pub enum GitHubAuth {
    /// Installation tokens minted from the App's private key.
    App {
        app_id: u64,
        installation_id: u64,
        private_key: PathBuf,
    },
    Token(String),
}

impl fmt::Debug for GitHubAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitHubAuth::App {
                app_id,
                installation_id,
                private_key,
            } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .field("private_key", private_key)
                .finish(),
            GitHubAuth::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}

fn default_remote_base() -> String {
    DEFAULT_REMOTE_BASE.to_string()
}

fn default_terraform_binary() -> PathBuf {
    PathBuf::from("terraform")
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl ServiceConfig {
    /// Loads the file named by `CONFIG_FILE` and applies environment
    /// overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = Self::load(&path)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file, without environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ServiceConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Applies `GITHUB_TOKEN`, `TELLUS_WEBHOOK_SECRET` and `TELLUS_PORT` as
    /// returned by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(secret) = lookup("TELLUS_WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(secret);
        }
        if let Some(port) = lookup("TELLUS_PORT") {
            self.web_port = port.trim().parse().map_err(|_| ServiceConfigError::InvalidEnv {
                var: "TELLUS_PORT",
                value: port,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.repository_root_directory.as_os_str().is_empty() {
            return Err(ServiceConfigError::Invalid(
                "repositoryRootDirectory must not be empty".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(ServiceConfigError::Invalid(
                "commandTimeoutSecs must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ServiceConfigError::Invalid(
                "queueCapacity must be positive".to_string(),
            ));
        }
        self.github_auth()?;
        Ok(())
    }

    /// Chooses GitHub credentials: the App when configured, else the token.
    ///
    /// Returns `None` when neither is set. A partially configured App is an
    /// error rather than a silent fallback to the token.
    pub fn github_auth(&self) -> Result<Option<GitHubAuth>> {
        let github = &self.github;
        match (
            &github.private_key,
            github.integration_id,
            github.installation_id,
        ) {
            (Some(key), Some(app_id), Some(installation_id)) => Ok(Some(GitHubAuth::App {
                app_id,
                installation_id,
                private_key: key.location.clone(),
            })),
            (None, None, None) => Ok(self
                .github_token()
                .map(|token| GitHubAuth::Token(token.to_string()))),
            _ => Err(ServiceConfigError::Invalid(
                "github.privateKey, github.integrationId and github.installationId must be set together"
                    .to_string(),
            )),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// The GitHub token, treating an empty value as unset.
    pub fn github_token(&self) -> Option<&str> {
        non_empty(&self.github.token)
    }

    /// The webhook secret, treating an empty value as unset.
    pub fn webhook_secret(&self) -> Option<&str> {
        non_empty(&self.github.webhook_secret)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ServiceConfig::from_yaml("repositoryRootDirectory: /srv/repos\n").unwrap();

        assert_eq!(config.repository_root_directory, PathBuf::from("/srv/repos"));
        assert_eq!(config.web_port, 8080);
        assert_eq!(config.remote_base, "https://github.com");
        assert_eq!(config.terraform_binary, PathBuf::from("terraform"));
        assert!(config.terraform_leading_args.is_empty());
        assert_eq!(config.command_timeout(), Duration::from_secs(1800));
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.github_token(), None);
        assert_eq!(config.webhook_secret(), None);
        config.validate().unwrap();
    }

    #[test]
    fn full_config() {
        let config = ServiceConfig::from_yaml(
            r#"
repositoryRootDirectory: /srv/repos
webPort: 9000
remoteBase: https://git.example.com
terraformBinary: /usr/bin/aws-vault
terraformLeadingArgs: [exec, prod, --, terraform]
commandTimeoutSecs: 60
queueCapacity: 4
github:
  token: ghp_abc
  webhookSecret: hunter2
"#,
        )
        .unwrap();

        assert_eq!(config.web_port, 9000);
        assert_eq!(config.remote_base, "https://git.example.com");
        assert_eq!(config.terraform_binary, PathBuf::from("/usr/bin/aws-vault"));
        assert_eq!(
            config.terraform_leading_args,
            vec!["exec", "prod", "--", "terraform"]
        );
        assert_eq!(config.command_timeout(), Duration::from_secs(60));
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.github_token(), Some("ghp_abc"));
        assert_eq!(config.webhook_secret(), Some("hunter2"));
    }

    #[test]
    fn repository_root_is_required() {
        let err = ServiceConfig::from_yaml("webPort: 8080\n").unwrap_err();
        assert!(matches!(err, ServiceConfigError::Parse(_)));
        assert!(err.to_string().contains("repositoryRootDirectory"));
    }

    #[test]
    fn env_overrides_file() {
        let mut config = ServiceConfig::from_yaml(
            "repositoryRootDirectory: /srv/repos\ngithub:\n  token: from-file\n",
        )
        .unwrap();

        config
            .apply_overrides(env(&[
                ("GITHUB_TOKEN", "from-env"),
                ("TELLUS_WEBHOOK_SECRET", "s3cret"),
                ("TELLUS_PORT", "3000"),
            ]))
            .unwrap();

        assert_eq!(config.github_token(), Some("from-env"));
        assert_eq!(config.webhook_secret(), Some("s3cret"));
        assert_eq!(config.web_port, 3000);
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = ServiceConfig::from_yaml("repositoryRootDirectory: /srv\n").unwrap();
        let err = config
            .apply_overrides(env(&[("TELLUS_PORT", "http")]))
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceConfigError::InvalidEnv { var: "TELLUS_PORT", ref value } if value == "http"
        ));
        assert_eq!(config.web_port, 8080);
    }

    #[test]
    fn empty_secrets_count_as_unset() {
        let mut config = ServiceConfig::from_yaml("repositoryRootDirectory: /srv\n").unwrap();
        config
            .apply_overrides(env(&[("GITHUB_TOKEN", ""), ("TELLUS_WEBHOOK_SECRET", "")]))
            .unwrap();

        assert_eq!(config.github_token(), None);
        assert_eq!(config.webhook_secret(), None);
    }

    #[test]
    fn validation_rejects_zeroes() {
        let config =
            ServiceConfig::from_yaml("repositoryRootDirectory: /srv\nqueueCapacity: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ServiceConfigError::Invalid(_))));

        let config =
            ServiceConfig::from_yaml("repositoryRootDirectory: /srv\ncommandTimeoutSecs: 0\n")
                .unwrap();
        assert!(matches!(config.validate(), Err(ServiceConfigError::Invalid(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tellus.yml");
        std::fs::write(&path, "repositoryRootDirectory: /srv\nwebPort: 8181\n").unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.web_port, 8181);

        let missing = ServiceConfig::load(&dir.path().join("absent.yml")).unwrap_err();
        assert!(matches!(missing, ServiceConfigError::Read { .. }));
    }

    #[test]
    fn github_app_credentials() {
        let config = ServiceConfig::from_yaml(
            r#"
repositoryRootDirectory: /srv/repos
github:
  privateKey:
    location: /config/tellus.private-key.pem
  integrationId: 12345
  installationId: 678901
  token: ghp_ignored
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.github.private_key,
            Some(PrivateKeyConfig {
                location: PathBuf::from("/config/tellus.private-key.pem"),
            })
        );
        assert_eq!(
            config.github_auth().unwrap(),
            Some(GitHubAuth::App {
                app_id: 12345,
                installation_id: 678901,
                private_key: PathBuf::from("/config/tellus.private-key.pem"),
            })
        );
    }

    #[test]
    fn token_is_used_without_app() {
        let mut config = ServiceConfig::from_yaml("repositoryRootDirectory: /srv
").unwrap();
        assert_eq!(config.github_auth().unwrap(), None);

        config
            .apply_overrides(env(&[("GITHUB_TOKEN", "ghp_abc")]))
            .unwrap();
        assert_eq!(
            config.github_auth().unwrap(),
            Some(GitHubAuth::Token("ghp_abc".to_string()))
        );
    }

    #[test]
    fn partial_app_config_is_rejected() {
        for github in [
            "  integrationId: 1\n  installationId: 2\n",
            "  privateKey:\n    location: /k.pem\n  integrationId: 1\n",
            "  installationId: 2\n  token: ghp_abc\n",
        ] {
            let config =
                ServiceConfig::from_yaml(&format!("repositoryRootDirectory: /srv\ngithub:\n{github}"))
                    .unwrap();
            assert!(
                matches!(config.validate(), Err(ServiceConfigError::Invalid(_))),
                "{github:?} should be rejected"
            );
        }
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = ServiceConfig::from_yaml(
            "repositoryRootDirectory: /srv\ngithub:\n  token: ghp_abc\n  webhookSecret: hunter2\n",
        )
        .unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("ghp_abc"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let auth = GitHubAuth::Token("ghp_abc".to_string());
        assert!(!format!("{auth:?}").contains("ghp_abc"));
    }
}

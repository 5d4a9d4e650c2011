//! Per-repository configuration, committed by the monitored repository.
//!
//! A repository opts into custom settings by committing a `.tellus` YAML file
//! at its root:
//!
//! ```yaml
//! tfDirectory: infra
//! branch: main
//! ```
//!
//! Both fields are optional. A missing file means "use the defaults".

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Name of the configuration file at the root of a checked-out repository.
pub const CONFIG_FILE_NAME: &str = ".tellus";

/// Branch that triggers an apply when the repository does not say otherwise.
pub const DEFAULT_TRACKED_BRANCH: &str = "master";

/// Errors from resolving a repository's configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not valid YAML or has fields of the wrong type.
    #[error("malformed {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `tfDirectory` points outside the repository.
    #[error("tfDirectory {0:?} must be a relative path inside the repository")]
    InvalidDirectory(String),
}

/// Resolved settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Directory, relative to the repository root, in which terraform runs.
    #[serde(rename = "tfDirectory")]
    pub terraform_subdir: String,

    /// Branch whose pushes are applied.
    #[serde(rename = "branch")]
    pub tracked_branch: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        RepoConfig {
            terraform_subdir: String::new(),
            tracked_branch: DEFAULT_TRACKED_BRANCH.to_string(),
        }
    }
}

impl RepoConfig {
    /// Returns the ref a push must target to trigger an apply.
    pub fn tracked_ref(&self) -> String {
        format!("refs/heads/{}", self.tracked_branch)
    }

    /// Joins the terraform subdirectory onto a clone path.
    ///
    /// Rejects absolute paths, `..` components, and symlinks that resolve
    /// outside `workdir`, so a repository cannot point terraform at another
    /// repository's clone. A directory that does not exist is returned as is;
    /// terraform reports it when it fails to initialise there.
    pub fn terraform_dir(&self, workdir: &Path) -> Result<PathBuf, ConfigError> {
        let invalid = || ConfigError::InvalidDirectory(self.terraform_subdir.clone());

        let subdir = Path::new(&self.terraform_subdir);
        for component in subdir.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(invalid()),
            }
        }

        let dir = workdir.join(subdir);
        let Ok(resolved) = dir.canonicalize() else {
            return Ok(dir);
        };
        let root = workdir.canonicalize().map_err(|_| invalid())?;
        if !resolved.starts_with(&root) {
            return Err(invalid());
        }
        Ok(dir)
    }
}

/// Reads the configuration from a checked-out tree.
pub fn resolve(workdir: &Path) -> Result<RepoConfig, ConfigError> {
    let path = workdir.join(CONFIG_FILE_NAME);

    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No repository config, using defaults");
            return Ok(RepoConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    // An empty document deserialises to unit, not a mapping.
    if contents.trim().is_empty() {
        return Ok(RepoConfig::default());
    }

    let config: RepoConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;

    debug!(
        terraform_subdir = %config.terraform_subdir,
        tracked_branch = %config.tracked_branch,
        "Resolved repository config"
    );
    Ok(config)
}

//! On-disk clones, one per repository, with per-repository locking.
//!
//! Each repository gets exactly one clone at `<root>/<owner>/<repo>`. Keying by
//! the full owner/repo pair means two owners with a repository of the same name
//! never share a directory.
//!
//! A clone's working tree is shared state: a checkout for one delivery would
//! rewrite the files terraform is reading for another. Access therefore goes
//! through a [`CloneLease`], which holds that repository's lock. The pipeline
//! keeps the lease across checkout, config resolution, execution and reporting,
//! so deliveries for one repository run one after another while different
//! repositories never wait on each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

use crate::types::{RepoId, Sha};

use super::{GitResult, checkout_force, clone, fetch};

/// Default remote that clones are made from.
pub const DEFAULT_REMOTE_BASE: &str = "https://github.com";

/// A clone checked out at a specific commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalClone {
    /// The repository this clone belongs to.
    pub repo: RepoId,
    /// Root of the working tree.
    pub path: PathBuf,
    /// The commit the working tree was reset to.
    pub head: Sha,
}

/// Storage and maintainer of the clones available on disk.
#[derive(Debug)]
pub struct RepoStore {
    root: PathBuf,
    remote_base: String,
    /// One lock per repository, created on first use and never evicted.
    locks: Mutex<HashMap<RepoId, Arc<Mutex<()>>>>,
}

impl RepoStore {
    /// Creates a store rooted at `root`, cloning from GitHub.
    ///
    /// Fails if the root directory does not exist and cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> GitResult<Self> {
        Self::with_remote_base(root, DEFAULT_REMOTE_BASE)
    }

    /// Creates a store that clones from `<remote_base>/<owner>/<repo>`.
    ///
    /// `remote_base` may be a URL or a local directory (used by tests and
    /// mirrors).
    pub fn with_remote_base(
        root: impl Into<PathBuf>,
        remote_base: impl Into<String>,
    ) -> GitResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!(root = %root.display(), "Repository store ready");

        Ok(RepoStore {
            root,
            remote_base: remote_base.into(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the directory holding all clones.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the clone directory for a repository.
    pub fn clone_dir(&self, repo: &RepoId) -> PathBuf {
        self.root.join(&repo.owner).join(&repo.repo)
    }

    /// Returns the URL a repository is cloned from.
    pub fn remote_url(&self, repo: &RepoId) -> String {
        format!(
            "{}/{}/{}",
            self.remote_base.trim_end_matches('/'),
            repo.owner,
            repo.repo
        )
    }

    /// Waits for exclusive access to a repository's clone.
    ///
    /// The returned lease must be held for as long as anything reads the
    /// working tree.
    pub async fn acquire(&self, repo: &RepoId) -> CloneLease {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(repo.clone()).or_default())
        };

        let guard = lock.lock_owned().await;
        debug!(repo = %repo, "Acquired clone lease");

        CloneLease {
            repo: repo.clone(),
            path: self.clone_dir(repo),
            parent: self.root.join(&repo.owner),
            remote_url: self.remote_url(repo),
            _guard: guard,
        }
    }

    /// Brings a repository's clone to `commit`, holding the lock only for the
    /// duration of the checkout.
    ///
    /// Callers that go on to read the tree should use [`RepoStore::acquire`]
    /// and keep the lease instead.
    pub async fn prepare(&self, repo: &RepoId, commit: &Sha) -> GitResult<LocalClone> {
        self.acquire(repo).await.prepare(commit).await
    }
}

/// Exclusive access to one repository's clone.
///
/// Dropping the lease releases the lock.
#[derive(Debug)]
pub struct CloneLease {
    repo: RepoId,
    path: PathBuf,
    parent: PathBuf,
    remote_url: String,
    _guard: OwnedMutexGuard<()>,
}

impl CloneLease {
    /// Returns the repository this lease is for.
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    /// Returns the clone directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensures the clone exists, fetches, and force-resets the tree to `commit`.
    ///
    /// A failure leaves the lease usable; a later call starts over, re-cloning
    /// if the previous clone never completed.
    #[instrument(skip(self), fields(repo = %self.repo, sha = %commit.short()))]
    pub async fn prepare(&self, commit: &Sha) -> GitResult<LocalClone> {
        let path = self.path.clone();
        let parent = self.parent.clone();
        let url = self.remote_url.clone();
        let target = commit.clone();

        tokio::task::spawn_blocking(move || sync_clone(&path, &parent, &url, &target)).await??;

        debug!(path = %self.path.display(), "Working tree at requested commit");
        Ok(LocalClone {
            repo: self.repo.clone(),
            path: self.path.clone(),
            head: commit.clone(),
        })
    }
}

fn sync_clone(path: &Path, parent: &Path, url: &str, commit: &Sha) -> GitResult<()> {
    if !path.join(".git").exists() {
        // Leftovers from an interrupted clone would make `git clone` refuse.
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        std::fs::create_dir_all(parent)?;
        info!(url = %url, path = %path.display(), "Cloning repository");
        clone(parent, url, path)?;
    }

    fetch(path)?;
    checkout_force(path, commit)?;
    Ok(())
}

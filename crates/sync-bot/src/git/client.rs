use super::{GitError, MergeOption, Repo, RepoProvider, Result, WorkingCopy};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use forge_client::CredentialProvider;
use log::{debug, info};
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sync_bot_config::{find_large_repository, ConflictSide, LargeRepository};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per `owner/repo`
///
/// Entries are created on first use and never removed.
#[derive(Debug, Default)]
pub struct RepoLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RepoLocks {
    /// The lock for `key`, created if missing
    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Clones repositories into a local cache and hands out locked copies
pub struct GitClient {
    cache_root: PathBuf,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    large_repositories: Vec<LargeRepository>,
    identity: Option<(String, String)>,
    retry: RetryPolicy,
    locks: RepoLocks,
}

impl GitClient {
    /// # Arguments
    ///
    /// * `cache_root` - Working copies go to `<cache_root>/<owner>/<repo>`
    /// * `base_url` - Remote base, repositories are `<base_url>/<owner>/<repo>.git`
    /// * `credentials` - Inserted into remote URLs for network operations
    pub fn new(
        cache_root: impl Into<PathBuf>,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            large_repositories: Vec::new(),
            identity: None,
            retry: RetryPolicy::GIT_NETWORK,
            locks: RepoLocks::default(),
        }
    }

    pub fn with_large_repositories(mut self, large: Vec<LargeRepository>) -> Self {
        self.large_repositories = large;
        self
    }

    /// Committer name and email configured in fresh clones
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some((name.into(), email.into()));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[cfg(test)]
    fn locks(&self) -> &RepoLocks {
        &self.locks
    }

    /// Lock `owner/repo`, then clone it on first use or fetch it otherwise
    ///
    /// The lock is held by the returned guard.
    pub async fn acquire(&self, owner: &str, repo: &str) -> Result<RepoGuard> {
        let key = format!("{}/{}", owner, repo);
        let lock = self.locks.lock_for(&key);
        debug!("Waiting for lock on {}", key);
        let guard = lock.lock_owned().await;
        debug!("Locked {}", key);

        let dir = self.cache_root.join(owner).join(repo);
        let large = find_large_repository(&self.large_repositories, owner, repo);
        let push_account = large.map(|l| l.overflow_account.as_str()).unwrap_or(owner);

        let handle = Repo::new(
            dir.clone(),
            owner,
            repo,
            &self.base_url,
            push_account,
            Arc::clone(&self.credentials),
            self.retry,
        );

        let cached = tokio::fs::try_exists(dir.join(".git"))
            .await
            .map_err(|source| GitError::Io {
                path: dir.clone(),
                source,
            })?;

        if !cached {
            if let Some(parent) = dir.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| GitError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            handle.clone_fresh().await?;
            if let Some((name, email)) = &self.identity {
                handle.config("user.name", name).await?;
                handle.config("user.email", email).await?;
            }
        } else if large.is_some_and(|l| l.skip_refresh) {
            info!("Skipping fetch of large repository {}", key);
        } else {
            handle.fetch().await?;
        }

        Ok(RepoGuard {
            repo: handle,
            _lock: guard,
        })
    }
}

#[async_trait]
impl RepoProvider for GitClient {
    async fn acquire(&self, owner: &str, repo: &str) -> Result<Box<dyn WorkingCopy>> {
        let guard = GitClient::acquire(self, owner, repo).await?;
        Ok(Box::new(guard))
    }
}

/// A working copy plus the lock of its repository
///
/// Dropping the guard releases the lock.
pub struct RepoGuard {
    repo: Repo,
    _lock: OwnedMutexGuard<()>,
}

impl RepoGuard {
    /// Release the lock
    pub fn release(self) {
        debug!("Releasing {}/{}", self.repo.owner(), self.repo.repo());
    }

    /// Delete the working copy from disk and release the lock
    pub async fn destroy(self) -> Result<()> {
        let dir = self.repo.directory().to_path_buf();
        info!("Destroying working copy {}", dir.display());
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|source| GitError::Io { path: dir, source })
    }
}

impl Deref for RepoGuard {
    type Target = Repo;

    fn deref(&self) -> &Repo {
        &self.repo
    }
}

#[async_trait]
impl WorkingCopy for RepoGuard {
    fn directory(&self) -> &Path {
        self.repo.directory()
    }

    fn canonical_url(&self) -> String {
        self.repo.canonical_url()
    }

    async fn clean(&self) -> Result<()> {
        self.repo.clean().await
    }

    async fn checkout(&self, commitlike: &str) -> Result<()> {
        self.repo.checkout(commitlike).await
    }

    async fn checkout_new_branch(&self, branch: &str, force: bool) -> Result<()> {
        self.repo.checkout_new_branch(branch, force).await
    }

    async fn fetch_pull_request(&self, number: u64) -> Result<()> {
        self.repo.fetch_pull_request(number).await
    }

    async fn cherry_pick(&self, first: &str, last: &str, side: ConflictSide) -> Result<()> {
        self.repo.cherry_pick(first, last, side).await
    }

    async fn cherry_pick_abort(&self) -> Result<()> {
        self.repo.cherry_pick_abort().await
    }

    async fn push(&self, refspec: &str, force: bool) -> Result<()> {
        self.repo.push(refspec, force).await
    }

    async fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        self.repo.delete_branch(branch, force).await
    }

    async fn delete_remote_branch(&self, branch: &str) -> Result<()> {
        self.repo.delete_remote_branch(branch).await
    }

    async fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        self.repo.remote_branch_exists(branch).await
    }

    async fn list_remotes(&self) -> Result<Vec<String>> {
        self.repo.list_remotes().await
    }

    async fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.repo.add_remote(name, url).await
    }

    async fn fetch_remote_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.repo.fetch_remote_branch(remote, branch).await
    }

    async fn merge(&self, commitlike: &str, option: MergeOption) -> Result<()> {
        self.repo.merge(commitlike, option).await
    }

    async fn config(&self, key: &str, value: &str) -> Result<()> {
        self.repo.config(key, value).await
    }

    async fn status(&self) -> Result<String> {
        self.repo.status().await
    }
}

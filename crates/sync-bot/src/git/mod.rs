//! Cached working copies and the git operations the sync engine needs
//!
//! Working copies live under `<cache_root>/<owner>/<repo>` and are reused
//! across requests. Access to one repository is serialized: a
//! [`RepoGuard`] holds the repository's lock until it is released or
//! dropped.

mod client;
mod error;
mod redact;
mod repo;

pub use client::{GitClient, RepoGuard, RepoLocks};
pub use error::{GitError, Result};
pub use redact::redact;
pub use repo::Repo;

use async_trait::async_trait;
use log::debug;
use std::path::Path;
use sync_bot_config::ConflictSide;

/// Fast-forward behaviour of `git merge`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOption {
    /// `--ff`
    FastForward,
    /// `--ff-only`
    FastForwardOnly,
    /// `--no-ff`
    NoFastForward,
}

impl MergeOption {
    fn as_flag(&self) -> &'static str {
        match self {
            Self::FastForward => "--ff",
            Self::FastForwardOnly => "--ff-only",
            Self::NoFastForward => "--no-ff",
        }
    }
}

/// Operations on a locked working copy
///
/// `origin` always refers to the repository the bot pushes to (a fork for
/// large repositories).
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    fn directory(&self) -> &Path;

    /// Canonical repository URL without credentials
    fn canonical_url(&self) -> String;

    /// Abort any cherry-pick in progress and drop local changes
    async fn clean(&self) -> Result<()>;

    async fn checkout(&self, commitlike: &str) -> Result<()>;

    /// Create `branch` at HEAD and check it out, replacing it when `force`
    async fn checkout_new_branch(&self, branch: &str, force: bool) -> Result<()>;

    /// Fetch the head of pull request `number` into `origin/pull/<number>`
    async fn fetch_pull_request(&self, number: u64) -> Result<()>;

    /// Replay `first^..last` onto HEAD
    async fn cherry_pick(&self, first: &str, last: &str, side: ConflictSide) -> Result<()>;

    async fn cherry_pick_abort(&self) -> Result<()>;

    /// Push `refspec` to origin
    async fn push(&self, refspec: &str, force: bool) -> Result<()>;

    async fn delete_branch(&self, branch: &str, force: bool) -> Result<()>;

    async fn delete_remote_branch(&self, branch: &str) -> Result<()>;

    async fn remote_branch_exists(&self, branch: &str) -> Result<bool>;

    async fn list_remotes(&self) -> Result<Vec<String>>;

    async fn add_remote(&self, name: &str, url: &str) -> Result<()>;

    /// Fetch `branch` of a named remote into `<remote>/<branch>`
    async fn fetch_remote_branch(&self, remote: &str, branch: &str) -> Result<()>;

    async fn merge(&self, commitlike: &str, option: MergeOption) -> Result<()>;

    async fn config(&self, key: &str, value: &str) -> Result<()>;

    async fn status(&self) -> Result<String>;
}

/// Hands out locked working copies
#[async_trait]
pub trait RepoProvider: Send + Sync {
    /// Wait for the repository's lock, then clone or refresh it
    async fn acquire(&self, owner: &str, repo: &str) -> Result<Box<dyn WorkingCopy>>;
}

/// Run git with `args` in `dir`, returning combined stdout/stderr
pub(crate) async fn run<S: AsRef<str>>(dir: Option<&Path>, args: &[S]) -> Result<String> {
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
    let shown = redact(&args.join(" "));
    debug!(
        "Running git {} in {}",
        shown,
        dir.map(|d| d.display().to_string())
            .unwrap_or_else(|| ".".to_string())
    );

    let mut command = tokio::process::Command::new("git");
    command.args(&args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let output = command.output().await.map_err(|source| GitError::Spawn {
        args: shown.clone(),
        source,
    })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(GitError::Command {
            args: shown,
            output: redact(combined.trim()),
        });
    }

    Ok(combined)
}

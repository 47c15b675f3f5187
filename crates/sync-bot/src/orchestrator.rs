//! Replaying a pull request onto other branches
//!
//! [`SyncOrchestrator::sync`] takes a merged pull request and a parsed
//! `/sync` request and produces one [`SyncOutcome`] per requested branch.
//! A failure on one branch is recorded in its outcome and never stops the
//! remaining branches. Only failures that affect every branch (listing
//! branches, cloning the repository) abort the whole request.

use crate::command::SyncRequest;
use crate::git::{GitError, MergeOption, RepoProvider, WorkingCopy};
use crate::render;
use crate::retry::{with_retry, RetryPolicy};
use forge_client::{
    is_not_found, is_not_implemented, ForgeClient, NewPullRequest, PullRequest,
    PullRequestCommit,
};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use sync_bot_config::{
    find_large_repository, BotConfig, ConflictSide, LargeRepository, SyncStrategy,
};
use thiserror::Error;

/// Remote name of the canonical repository inside an overflow fork's clone
const UPSTREAM_REMOTE: &str = "upstream";

/// What happened to one requested branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// The branch does not exist on the remote
    NotFound,
    /// A follow-up pull request was opened
    Created,
    /// The changes did not apply to the branch
    Failed(String),
    /// Something else went wrong (git, forge)
    Error(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "branch not found, ignored"),
            Self::Created => write!(f, "sync PR created"),
            Self::Failed(reason) => write!(f, "sync failed: {}", reason),
            Self::Error(description) => write!(f, "{}", description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub branch: String,
    pub status: SyncStatus,
    /// Link to the follow-up pull request, when one was created
    pub pull_request_url: Option<String>,
}

impl SyncOutcome {
    fn new(branch: &str, status: SyncStatus) -> Self {
        Self {
            branch: branch.to_string(),
            status,
            pull_request_url: None,
        }
    }

    fn created(branch: &str, url: String) -> Self {
        Self {
            branch: branch.to_string(),
            status: SyncStatus::Created,
            pull_request_url: Some(url),
        }
    }
}

/// Failures that abort a whole sync request
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync strategy {0} is not implemented")]
    StrategyNotImplemented(SyncStrategy),

    #[error("{action} failed: {error:#}")]
    Forge {
        action: &'static str,
        error: anyhow::Error,
    },

    #[error("pull request #{0} has no commits")]
    NoCommits(u64),

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Knobs the orchestrator takes from the bot configuration
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub conflict_side: ConflictSide,
    pub pull_request_retry: RetryPolicy,
    pub large_repositories: Vec<LargeRepository>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            conflict_side: ConflictSide::default(),
            pull_request_retry: RetryPolicy::PULL_REQUEST,
            large_repositories: Vec::new(),
        }
    }
}

impl From<&BotConfig> for SyncSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            conflict_side: config.conflict_side,
            pull_request_retry: config.pull_request_retry.into(),
            large_repositories: config.large_repositories.clone(),
        }
    }
}

/// Everything shared by the follow-up pull requests of one request
struct SyncContext<'a> {
    owner: &'a str,
    repo: &'a str,
    pr: &'a PullRequest,
    title: String,
    body: String,
    large: Option<&'a LargeRepository>,
}

impl SyncContext<'_> {
    fn label(&self, branch: &str) -> String {
        format!("{}/{}#{} -> {}", self.owner, self.repo, self.pr.number, branch)
    }

    fn new_pull_request(&self, head: String, base: &str) -> NewPullRequest {
        NewPullRequest {
            title: self.title.clone(),
            body: self.body.clone(),
            head,
            base: base.to_string(),
            maintainer_can_modify: true,
        }
    }
}

/// Runs sync requests against a forge and the repository cache
pub struct SyncOrchestrator {
    forge: Arc<dyn ForgeClient>,
    repos: Arc<dyn RepoProvider>,
    settings: SyncSettings,
}

impl SyncOrchestrator {
    pub fn new(
        forge: Arc<dyn ForgeClient>,
        repos: Arc<dyn RepoProvider>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            forge,
            repos,
            settings,
        }
    }

    /// Replay `pr` onto every branch of `request`
    ///
    /// Returns one outcome per requested branch, in request order.
    pub async fn sync(
        &self,
        owner: &str,
        repo: &str,
        pr: &PullRequest,
        request: &SyncRequest,
    ) -> Result<Vec<SyncOutcome>, SyncError> {
        info!(
            "Sync {}/{}#{} with strategy {} onto {:?}",
            owner, repo, pr.number, request.strategy, request.branches
        );

        if request.strategy == SyncStrategy::Overwrite {
            return Err(SyncError::StrategyNotImplemented(request.strategy));
        }

        let existing: HashSet<String> = self
            .forge
            .list_branches(owner, repo, false)
            .await
            .map_err(|error| SyncError::Forge {
                action: "List branches",
                error,
            })?
            .into_iter()
            .map(|b| b.name)
            .collect();

        let issues = tolerate_missing(
            self.forge.list_pull_request_issues(owner, repo, pr.number).await,
            "List pull request issues",
        )?;
        let commits = tolerate_missing(
            self.forge.list_pull_request_commits(owner, repo, pr.number).await,
            "List pull request commits",
        )?;

        let context = SyncContext {
            owner,
            repo,
            pr,
            title: render::sync_pull_request_title(pr),
            body: render::sync_pull_request_body(pr, &issues, &commits),
            large: find_large_repository(&self.settings.large_repositories, owner, repo),
        };

        match request.strategy {
            SyncStrategy::CherryPick => {
                self.cherry_pick(&context, &commits, &request.branches, &existing)
                    .await
            }
            SyncStrategy::DirectBranch => {
                Ok(self.direct_branch(&context, &request.branches, &existing).await)
            }
            SyncStrategy::Overwrite => Err(SyncError::StrategyNotImplemented(request.strategy)),
        }
    }

    async fn cherry_pick(
        &self,
        context: &SyncContext<'_>,
        commits: &[PullRequestCommit],
        branches: &[String],
        existing: &HashSet<String>,
    ) -> Result<Vec<SyncOutcome>, SyncError> {
        let (first, last) = match (commits.first(), commits.last()) {
            (Some(first), Some(last)) => (first.sha.as_str(), last.sha.as_str()),
            _ => return Err(SyncError::NoCommits(context.pr.number)),
        };

        if !branches.iter().any(|b| existing.contains(b)) {
            return Ok(branches
                .iter()
                .map(|b| SyncOutcome::new(b, SyncStatus::NotFound))
                .collect());
        }

        // Held until every branch is done
        let copy = self.repos.acquire(context.owner, context.repo).await?;

        let mut outcomes = Vec::with_capacity(branches.len());
        for branch in branches {
            if !existing.contains(branch) {
                info!("{}: branch not found", context.label(branch));
                outcomes.push(SyncOutcome::new(branch, SyncStatus::NotFound));
                continue;
            }
            let outcome = self
                .cherry_pick_onto(copy.as_ref(), context, branch, first, last)
                .await;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn cherry_pick_onto(
        &self,
        copy: &dyn WorkingCopy,
        context: &SyncContext<'_>,
        branch: &str,
        first: &str,
        last: &str,
    ) -> SyncOutcome {
        let label = context.label(branch);
        let pr = context.pr;
        let temp_branch = format!("sync-pr{}-{}-to-{}", pr.number, pr.head_ref, branch);

        if let Err(e) = copy.clean().await {
            warn!("{}: cleaning working copy failed: {}", label, e);
        }

        let prepared = match context.large {
            Some(large) => refresh_overflow_branch(copy, large, branch).await,
            None => copy.checkout(&format!("origin/{}", branch)).await,
        };
        if let Err(e) = prepared {
            error!("{}: preparing branch failed: {}", label, e);
            return SyncOutcome::new(branch, SyncStatus::Error(e.to_string()));
        }

        let staged = async {
            copy.checkout_new_branch(&temp_branch, true).await?;
            copy.fetch_pull_request(pr.number).await
        }
        .await;
        if let Err(e) = staged {
            error!("{}: {}", label, e);
            return SyncOutcome::new(branch, SyncStatus::Error(e.to_string()));
        }

        if let Err(e) = copy
            .cherry_pick(first, last, self.settings.conflict_side)
            .await
        {
            error!("{}: cherry-pick failed: {}", label, e);
            if let Err(e) = copy.cherry_pick_abort().await {
                debug!("{}: cherry-pick --abort: {}", label, e);
            }
            return SyncOutcome::new(
                branch,
                SyncStatus::Failed(format!(
                    "cherry-pick of {}..{} does not apply",
                    short(first),
                    short(last)
                )),
            );
        }

        if let Err(e) = copy.push(&temp_branch, true).await {
            error!("{}: {}", label, e);
            return SyncOutcome::new(branch, SyncStatus::Error(e.to_string()));
        }

        let head = match context.large {
            Some(large) => format!("{}:{}", large.overflow_account, temp_branch),
            None => temp_branch,
        };
        let new_pr = context.new_pull_request(head, branch);
        let created = with_retry(
            self.settings.pull_request_retry,
            "create pull request",
            || self.forge.create_pull_request(context.owner, context.repo, &new_pr),
        )
        .await;

        match created {
            Ok(created) => {
                info!("{}: created pull request #{}", label, created.number);
                SyncOutcome::created(branch, created.html_url)
            }
            Err(e) => {
                error!("{}: create pull request failed: {:#}", label, e);
                SyncOutcome::new(branch, SyncStatus::Error(format!("{:#}", e)))
            }
        }
    }

    async fn direct_branch(
        &self,
        context: &SyncContext<'_>,
        branches: &[String],
        existing: &HashSet<String>,
    ) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::with_capacity(branches.len());
        for branch in branches {
            if !existing.contains(branch) {
                info!("{}: branch not found", context.label(branch));
                outcomes.push(SyncOutcome::new(branch, SyncStatus::NotFound));
                continue;
            }
            outcomes.push(self.direct_branch_onto(context, branch).await);
        }
        outcomes
    }

    async fn direct_branch_onto(&self, context: &SyncContext<'_>, branch: &str) -> SyncOutcome {
        let label = context.label(branch);
        let (owner, repo) = (context.owner, context.repo);
        let temp_branch = format!("sync-pr{}-to-{}", context.pr.number, branch);

        // The branch may be left over from an earlier attempt
        match self
            .forge
            .create_branch(owner, repo, &temp_branch, &context.pr.head_sha)
            .await
        {
            Ok(()) => info!("{}: created branch {}", label, temp_branch),
            Err(e) => error!("{}: create branch {} failed: {:#}", label, temp_branch, e),
        }

        let visible = with_retry(
            self.settings.pull_request_retry,
            "wait for branch",
            || self.forge.get_branch(owner, repo, &temp_branch),
        )
        .await;
        match visible {
            Err(e) if is_not_found(&e) => {
                warn!("{}: branch {} not visible yet", label, temp_branch)
            }
            Err(e) => warn!("{}: could not check branch {}: {:#}", label, temp_branch, e),
            Ok(_) => {}
        }

        let new_pr = context.new_pull_request(temp_branch, branch);
        match self.forge.create_pull_request(owner, repo, &new_pr).await {
            Ok(created) => {
                info!("{}: created pull request #{}", label, created.number);
                SyncOutcome::created(branch, created.html_url)
            }
            Err(e) => {
                error!("{}: create pull request failed: {:#}", label, e);
                SyncOutcome::new(branch, SyncStatus::Error(format!("{:#}", e)))
            }
        }
    }
}

/// Bring `branch` of the overflow fork up to date with the canonical repository
///
/// Leaves the refreshed branch checked out (detached).
async fn refresh_overflow_branch(
    copy: &dyn WorkingCopy,
    large: &LargeRepository,
    branch: &str,
) -> Result<(), GitError> {
    info!(
        "Refreshing {} of fork {}/{}",
        branch, large.overflow_account, large.repo
    );

    let remotes = copy.list_remotes().await?;
    if !remotes.iter().any(|r| r == UPSTREAM_REMOTE) {
        copy.add_remote(UPSTREAM_REMOTE, &copy.canonical_url()).await?;
    }
    copy.fetch_remote_branch(UPSTREAM_REMOTE, branch).await?;

    let upstream = format!("{}/{}", UPSTREAM_REMOTE, branch);
    if copy.remote_branch_exists(branch).await? {
        copy.checkout(&format!("origin/{}", branch)).await?;
        copy.merge(&upstream, MergeOption::FastForward).await?;
    } else {
        info!("Fork lacks {}, creating it from {}", branch, upstream);
        copy.checkout(&upstream).await?;
    }
    copy.push(&format!("HEAD:refs/heads/{}", branch), false)
        .await
}

/// Treat a capability the forge does not offer as an empty list
fn tolerate_missing<T>(
    result: anyhow::Result<Vec<T>>,
    action: &'static str,
) -> Result<Vec<T>, SyncError> {
    match result {
        Ok(items) => Ok(items),
        Err(error) if is_not_implemented(&error) => {
            warn!("{}: {}", action, error);
            Ok(Vec::new())
        }
        Err(error) => Err(SyncError::Forge { action, error }),
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

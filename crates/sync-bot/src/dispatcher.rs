//! Event handling
//!
//! Decides what to do with a pull request or comment event and does it.
//! Handling never fails from the caller's point of view: problems are
//! logged, and where the user is waiting for an answer, reported back as
//! a comment.

use crate::command::CommandParser;
use crate::git::{MergeOption, RepoProvider};
use crate::orchestrator::{SyncOrchestrator, SyncSettings};
use crate::render::{self, CommandContext};
use crate::retry::{with_retry, RetryPolicy};
use anyhow::Context;
use forge_client::{Comment, ForgeClient, PullRequest};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use sync_bot_config::BotConfig;
use tokio::task::JoinSet;

/// What happened on the forge
#[derive(Debug, Clone)]
pub enum EventKind {
    PullRequestOpened,
    /// New commits or an edited description
    PullRequestUpdated,
    PullRequestMerged,
    /// Closed without merging
    PullRequestClosed,
    CommentPosted(Comment),
}

/// An event on pull request `pull_request` of `owner/repo`
#[derive(Debug, Clone)]
pub struct Event {
    pub owner: String,
    pub repo: String,
    pub pull_request: PullRequest,
    pub kind: EventKind,
}

impl Event {
    fn label(&self) -> String {
        format!("{}/{}#{}", self.owner, self.repo, self.pull_request.number)
    }
}

pub struct Dispatcher {
    config: Arc<BotConfig>,
    forge: Arc<dyn ForgeClient>,
    repos: Arc<dyn RepoProvider>,
    parser: CommandParser,
    orchestrator: SyncOrchestrator,
    pull_request_retry: RetryPolicy,
    /// Delayed comments still waiting to be posted
    background: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<BotConfig>,
        forge: Arc<dyn ForgeClient>,
        repos: Arc<dyn RepoProvider>,
    ) -> Result<Self, regex::Error> {
        let parser = CommandParser::new(config.default_strategy)?;
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&forge),
            Arc::clone(&repos),
            SyncSettings::from(config.as_ref()),
        );
        Ok(Self {
            pull_request_retry: config.pull_request_retry.into(),
            config,
            forge,
            repos,
            parser,
            orchestrator,
            background: Mutex::new(JoinSet::new()),
        })
    }

    pub fn forge(&self) -> &dyn ForgeClient {
        self.forge.as_ref()
    }

    /// Wait for delayed comments that are still pending
    pub async fn shutdown(&self) {
        let mut pending = std::mem::take(&mut *self.background_tasks());
        if !pending.is_empty() {
            info!("Waiting for {} delayed comments", pending.len());
        }
        while let Some(done) = pending.join_next().await {
            if let Err(e) = done {
                error!("Delayed comment task panicked: {}", e);
            }
        }
    }

    fn background_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.background.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle one event to completion
    ///
    /// The courtesy comment on bot pull requests is posted from a background
    /// task after the configured delay, see [`Dispatcher::shutdown`].
    pub async fn handle(&self, event: Event) {
        let label = event.label();
        if self.config.is_ignored(&event.owner, &event.repo) {
            info!("{}: repository is ignored", label);
            return;
        }

        let pr = &event.pull_request;
        let bot_title = self.parser.matches_title(&pr.title);
        let sync_target = self.parser.matches_sync_branch(&pr.base_ref);

        let result = match &event.kind {
            EventKind::PullRequestOpened if bot_title => {
                self.schedule_courtesy_comment(&event);
                Ok(())
            }
            EventKind::PullRequestOpened if sync_target => self.auto_merge(&event).await,
            EventKind::PullRequestOpened => self.greet(&event).await,
            EventKind::PullRequestUpdated if sync_target => self.auto_merge(&event).await,
            EventKind::PullRequestMerged if bot_title => {
                info!("{}: merged pull request was created by the bot, ignoring", label);
                Ok(())
            }
            EventKind::PullRequestMerged if sync_target => {
                info!("{}: merged into a sync branch, ignoring", label);
                Ok(())
            }
            EventKind::PullRequestMerged => self.on_merged(&event).await,
            EventKind::PullRequestClosed if bot_title => self.delete_sync_branch(&event).await,
            EventKind::CommentPosted(comment) => self.on_comment(&event, comment).await,
            kind => {
                debug!("{}: ignoring {:?}", label, kind);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("{}: {:#}", label, e);
        }
    }

    fn schedule_courtesy_comment(&self, event: &Event) {
        let forge = Arc::clone(&self.forge);
        let delay = self.config.courtesy_delay();
        let body = self.config.courtesy_comment.clone();
        let (owner, repo) = (event.owner.clone(), event.repo.clone());
        let number = event.pull_request.number;
        let label = event.label();

        let mut background = self.background_tasks();
        while let Some(done) = background.try_join_next() {
            if let Err(e) = done {
                error!("Delayed comment task panicked: {}", e);
            }
        }
        background.spawn(async move {
            tokio::time::sleep(delay).await;
            match forge.create_comment(&owner, &repo, number, &body).await {
                Ok(()) => info!("{}: posted {}", label, body),
                Err(e) => warn!("{}: posting {} failed: {:#}", label, body, e),
            }
        });
    }

    async fn comment(&self, event: &Event, body: &str) -> anyhow::Result<()> {
        self.forge
            .create_comment(&event.owner, &event.repo, event.pull_request.number, body)
            .await
            .context("Create comment failed")
    }

    /// Protected branch table for a newly opened pull request
    async fn greet(&self, event: &Event) -> anyhow::Result<()> {
        info!("{}: greeting new pull request", event.label());
        self.reply_sync_check(event).await
    }

    async fn reply_sync_check(&self, event: &Event) -> anyhow::Result<()> {
        let branches = self
            .forge
            .list_branches(&event.owner, &event.repo, true)
            .await
            .context("List protected branches failed")?;
        let body = render::sync_check(
            &self.config.git_base_url(),
            &event.owner,
            &event.repo,
            &branches,
            Some(&event.pull_request.base_ref),
        );
        self.comment(event, &body).await
    }

    /// Run the newest valid `/sync` among the comments of a merged pull request
    async fn on_merged(&self, event: &Event) -> anyhow::Result<()> {
        let pr = &event.pull_request;
        let comments = self
            .forge
            .list_pull_request_comments(&event.owner, &event.repo, pr.number)
            .await
            .context("List comments failed")?;

        let newest = comments
            .iter()
            .filter(|c| self.parser.matches_sync(&c.body))
            .max_by_key(|c| c.created_at);
        match newest {
            Some(comment) => self.execute_sync(event, comment).await,
            None => {
                info!("{}: no /sync command among {} comments", event.label(), comments.len());
                Ok(())
            }
        }
    }

    async fn on_comment(&self, event: &Event, comment: &Comment) -> anyhow::Result<()> {
        let label = event.label();
        let pr = &event.pull_request;
        let body = comment.body.as_str();

        if self.parser.matches_sync_check(body) {
            info!("{}: /sync-check from {}", label, comment.user.login);
            return self.reply_sync_check(event).await;
        }

        if self.parser.matches_sync(body) {
            info!("{}: /sync from {}", label, comment.user.login);
            if pr.is_open() {
                return self.acknowledge_sync(event, comment).await;
            }
            if pr.is_merged() {
                return self.execute_sync(event, comment).await;
            }
            info!("{}: pull request is closed, ignoring /sync", label);
            return Ok(());
        }

        if self.parser.matches_close(body) {
            if !pr.is_open() || !self.parser.matches_title(&pr.title) {
                info!("{}: /close only applies to open bot pull requests", label);
                return Ok(());
            }
            info!("{}: /close from {}", label, comment.user.login);
            self.delete_sync_branch(event).await?;
            return self
                .forge
                .close_pull_request(&event.owner, &event.repo, pr.number)
                .await
                .context("Close pull request failed");
        }

        debug!("{}: ignoring comment {}", label, comment.id);
        Ok(())
    }

    /// List which requested branches exist, without syncing yet
    async fn acknowledge_sync(&self, event: &Event, comment: &Comment) -> anyhow::Result<()> {
        let request = match self.parser.parse(&comment.body) {
            Ok(request) => request,
            Err(e) => return self.comment(event, &render::parse_failure(&e)).await,
        };

        let branches = match self
            .forge
            .list_branches(&event.owner, &event.repo, false)
            .await
        {
            Ok(branches) => branches,
            Err(e) => {
                return self
                    .comment(event, &format!("List branches failed: {:#}", e))
                    .await
            }
        };

        let presence: Vec<(String, bool)> = request
            .branches
            .iter()
            .map(|name| (name.clone(), branches.iter().any(|b| &b.name == name)))
            .collect();
        let body = render::sync_acknowledgement(&command_context(comment), &presence);
        self.comment(event, &body).await
    }

    async fn execute_sync(&self, event: &Event, comment: &Comment) -> anyhow::Result<()> {
        let request = match self.parser.parse(&comment.body) {
            Ok(request) => request,
            Err(e) => return self.comment(event, &render::parse_failure(&e)).await,
        };

        let body = match self
            .orchestrator
            .sync(&event.owner, &event.repo, &event.pull_request, &request)
            .await
        {
            Ok(outcomes) => render::sync_result(&command_context(comment), &outcomes),
            Err(e) => {
                error!("{}: sync failed: {}", event.label(), e);
                format!("Sync failed: {}", e)
            }
        };
        self.comment(event, &body).await
    }

    /// Fast-forward a sync branch to the head of a pull request targeting it
    async fn auto_merge(&self, event: &Event) -> anyhow::Result<()> {
        let pr = &event.pull_request;
        let label = event.label();

        let mergeable = match pr.mergeable {
            Some(mergeable) => mergeable,
            None => self.wait_for_mergeable(event).await,
        };
        if !mergeable {
            info!("{}: not mergeable, skipping auto-merge", label);
            return self
                .comment(event, "The current pull request can not be merge.")
                .await;
        }

        info!("{}: auto-merging into {}", label, pr.base_ref);
        let copy = self
            .repos
            .acquire(&event.owner, &event.repo)
            .await
            .context("Acquire repository failed")?;

        copy.clean().await?;
        copy.fetch_pull_request(pr.number).await?;
        copy.checkout(&format!("origin/{}", pr.base_ref)).await?;
        copy.checkout_new_branch(&pr.base_ref, true).await?;
        copy.merge(
            &format!("origin/pull/{}", pr.number),
            MergeOption::FastForwardOnly,
        )
        .await?;
        copy.push(&pr.base_ref, true).await?;
        Ok(())
    }

    /// Re-read the pull request until the forge has computed its mergeability
    ///
    /// Webhook payloads carry `mergeable: null` until then. If it stays
    /// unknown, the fast-forward-only merge decides.
    async fn wait_for_mergeable(&self, event: &Event) -> bool {
        let forge = self.forge.as_ref();
        let (owner, repo) = (event.owner.as_str(), event.repo.as_str());
        let number = event.pull_request.number;
        let known = with_retry(self.pull_request_retry, "get mergeability", || async move {
            let pr = forge.get_pull_request(owner, repo, number).await?;
            pr.mergeable.context("mergeability not computed yet")
        })
        .await;

        match known {
            Ok(mergeable) => mergeable,
            Err(e) => {
                warn!("{}: {:#}, attempting fast-forward anyway", event.label(), e);
                true
            }
        }
    }

    /// Remove the temporary branch a bot pull request was opened from
    async fn delete_sync_branch(&self, event: &Event) -> anyhow::Result<()> {
        let branch = &event.pull_request.head_ref;
        if !self.parser.matches_sync_branch(branch) {
            warn!("{}: source branch {} is not a sync branch", event.label(), branch);
            return Ok(());
        }

        let copy = self
            .repos
            .acquire(&event.owner, &event.repo)
            .await
            .context("Acquire repository failed")?;
        if !copy.remote_branch_exists(branch).await? {
            warn!("{}: source branch {} not found", event.label(), branch);
            return Ok(());
        }
        copy.delete_remote_branch(branch).await?;
        info!("{}: deleted source branch {}", event.label(), branch);
        Ok(())
    }
}

fn command_context(comment: &Comment) -> CommandContext<'_> {
    CommandContext {
        url: &comment.html_url,
        user: &comment.user.login,
        command: &comment.body,
    }
}

//! In-memory forge and working copies for tests

use crate::git::{GitError, MergeOption, RepoProvider, Result as GitResult, WorkingCopy};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use forge_client::{
    Branch, Comment, CreatedPullRequest, ForgeClient, ForgeError, Issue, NewPullRequest,
    PullRequest, PullRequestCommit, PullRequestState, User,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use sync_bot_config::ConflictSide;
use tokio::sync::OwnedMutexGuard;

pub fn merged_pull_request(number: u64) -> PullRequest {
    PullRequest {
        number,
        title: "Fix build".to_string(),
        body: Some("Fixes the build".to_string()),
        html_url: format!("https://github.com/acme/widget/pull/{}", number),
        head_ref: "fix".to_string(),
        head_sha: "f00d".to_string(),
        base_ref: "master".to_string(),
        base_sha: "ba5e".to_string(),
        state: PullRequestState::Merged,
        mergeable: None,
    }
}

pub fn open_pull_request(number: u64) -> PullRequest {
    PullRequest {
        state: PullRequestState::Open,
        mergeable: Some(true),
        ..merged_pull_request(number)
    }
}

pub fn commit(sha: &str) -> PullRequestCommit {
    PullRequestCommit {
        sha: sha.to_string(),
        html_url: format!("https://github.com/acme/widget/commit/{}", sha),
        message: format!("Commit {}", sha),
        authored_at: None,
    }
}

/// A comment by `user`, posted `minute` minutes into the day
pub fn comment(id: u64, user: &str, body: &str, minute: u32) -> Comment {
    Comment {
        id,
        body: body.to_string(),
        html_url: format!("https://github.com/acme/widget/pull/7#issuecomment-{}", id),
        user: User {
            login: user.to_string(),
            html_url: format!("https://github.com/{}", user),
        },
        created_at: Utc
            .with_ymd_and_hms(2024, 5, 1, 12, minute, 0)
            .single()
            .unwrap_or_default(),
    }
}

/// A user object as GitHub sends it
pub fn user_json(login: &str) -> Value {
    let api = format!("https://api.github.com/users/{}", login);
    json!({
        "login": login,
        "id": 1,
        "node_id": "U_1",
        "avatar_url": "https://avatars.githubusercontent.com/u/1",
        "gravatar_id": "",
        "url": api,
        "html_url": format!("https://github.com/{}", login),
        "followers_url": format!("{}/followers", api),
        "following_url": format!("{}/following", api),
        "gists_url": format!("{}/gists", api),
        "starred_url": format!("{}/starred", api),
        "subscriptions_url": format!("{}/subscriptions", api),
        "organizations_url": format!("{}/orgs", api),
        "repos_url": format!("{}/repos", api),
        "events_url": format!("{}/events", api),
        "received_events_url": format!("{}/received_events", api),
        "type": "User",
        "site_admin": false
    })
}

/// A pull request object of `acme/widget` as GitHub sends it
///
/// `mergeable` is `null` in freshly opened pull requests.
pub fn pull_request_json(
    number: u64,
    base_ref: &str,
    state: &str,
    merged: bool,
    mergeable: Option<bool>,
) -> Value {
    json!({
        "url": format!("https://api.github.com/repos/acme/widget/pulls/{}", number),
        "id": 1000 + number,
        "number": number,
        "title": "Fix build",
        "body": null,
        "html_url": format!("https://github.com/acme/widget/pull/{}", number),
        "state": state,
        "merged": merged,
        "merged_at": null,
        "mergeable": mergeable,
        "user": user_json("alice"),
        "head": {"ref": "fix", "sha": "f00d"},
        "base": {"ref": base_ref, "sha": "ba5e"}
    })
}

/// An issue comment object as GitHub sends it
pub fn comment_json(id: u64, login: &str, body: &str) -> Value {
    json!({
        "id": id,
        "node_id": format!("IC_{}", id),
        "url": format!("https://api.github.com/repos/acme/widget/issues/comments/{}", id),
        "html_url": format!("https://github.com/acme/widget/pull/7#issuecomment-{}", id),
        "body": body,
        "user": user_json(login),
        "created_at": "2024-05-01T12:00:00Z"
    })
}

/// The `repository` object of a webhook payload
pub fn repository_json() -> Value {
    json!({"name": "widget", "owner": {"login": "acme"}})
}

#[derive(Debug, Default)]
pub struct ForgeState {
    pub branches: Vec<Branch>,
    pub commits: Vec<PullRequestCommit>,
    /// None answers as a forge without linked issues
    pub issues: Option<Vec<Issue>>,
    pub comments: Vec<Comment>,
    pub pull_requests: Vec<PullRequest>,

    pub fail_list_branches: bool,
    pub fail_create_branch: bool,
    pub create_pull_request_failures: usize,

    pub list_branches_calls: usize,
    pub get_branch_calls: usize,
    pub create_pull_request_calls: usize,

    pub created_branches: Vec<(String, String)>,
    pub created_pull_requests: Vec<NewPullRequest>,
    pub posted_comments: Vec<(u64, String)>,
    pub closed: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct FakeForge {
    state: Mutex<ForgeState>,
}

impl FakeForge {
    /// A forge whose repository has `names`, all protected except `master`
    pub fn with_branches(names: &[&str]) -> Arc<Self> {
        let forge = Self::default();
        forge.state().branches = names
            .iter()
            .map(|name| Branch {
                name: name.to_string(),
                protected: *name != "master",
            })
            .collect();
        Arc::new(forge)
    }

    pub fn state(&self) -> MutexGuard<'_, ForgeState> {
        self.state.lock().unwrap()
    }

    pub fn posted(&self) -> Vec<String> {
        self.state()
            .posted_comments
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl ForgeClient for FakeForge {
    async fn list_branches(
        &self,
        _owner: &str,
        _repo: &str,
        only_protected: bool,
    ) -> anyhow::Result<Vec<Branch>> {
        let mut state = self.state();
        state.list_branches_calls += 1;
        if state.fail_list_branches {
            anyhow::bail!("forge unavailable");
        }
        Ok(state
            .branches
            .iter()
            .filter(|b| !only_protected || b.protected)
            .cloned()
            .collect())
    }

    async fn get_branch(&self, _owner: &str, _repo: &str, branch: &str) -> anyhow::Result<Branch> {
        let mut state = self.state();
        state.get_branch_calls += 1;
        let known = state.branches.iter().any(|b| b.name == branch)
            || state.created_branches.iter().any(|(name, _)| name == branch);
        if !known {
            return Err(ForgeError::NotFound(format!("branch {}", branch)).into());
        }
        Ok(Branch {
            name: branch.to_string(),
            protected: false,
        })
    }

    async fn create_branch(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        sha: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        if state.fail_create_branch {
            anyhow::bail!("reference already exists");
        }
        state
            .created_branches
            .push((branch.to_string(), sha.to_string()));
        Ok(())
    }

    async fn get_text_file(
        &self,
        _owner: &str,
        _repo: &str,
        _path: &str,
        _git_ref: &str,
    ) -> anyhow::Result<String> {
        Err(ForgeError::NotImplemented("get_text_file").into())
    }

    async fn get_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> anyhow::Result<PullRequest> {
        self.state()
            .pull_requests
            .iter()
            .find(|pr| pr.number == number)
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(format!("pull request #{}", number)).into())
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        request: &NewPullRequest,
    ) -> anyhow::Result<CreatedPullRequest> {
        let mut state = self.state();
        state.create_pull_request_calls += 1;
        if state.create_pull_request_failures > 0 {
            state.create_pull_request_failures -= 1;
            anyhow::bail!("head branch not found yet");
        }
        state.created_pull_requests.push(request.clone());
        let number = 100 + state.created_pull_requests.len() as u64;
        Ok(CreatedPullRequest {
            number,
            html_url: format!("https://github.com/{}/{}/pull/{}", owner, repo, number),
        })
    }

    async fn close_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> anyhow::Result<()> {
        self.state().closed.push(number);
        Ok(())
    }

    async fn list_pull_request_commits(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> anyhow::Result<Vec<PullRequestCommit>> {
        Ok(self.state().commits.clone())
    }

    async fn list_pull_request_issues(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> anyhow::Result<Vec<Issue>> {
        match &self.state().issues {
            Some(issues) => Ok(issues.clone()),
            None => Err(ForgeError::NotImplemented("list_pull_request_issues").into()),
        }
    }

    async fn list_pull_request_comments(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> anyhow::Result<Vec<Comment>> {
        Ok(self.state().comments.clone())
    }

    async fn create_comment(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        self.state().posted_comments.push((number, body.to_string()));
        Ok(())
    }
}

#[derive(Debug)]
pub struct CopyState {
    /// Every operation, one line each, e.g. `checkout origin/stable`
    pub log: Vec<String>,
    /// Target branches on which a cherry-pick does not apply
    pub conflicts: HashSet<String>,
    /// Branches present on origin
    pub remote_branches: HashSet<String>,
    pub remotes: Vec<String>,
    pub fail_acquire: bool,
    pub fail_merge: bool,
    pub acquired: usize,
    base: String,
}

impl Default for CopyState {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            conflicts: HashSet::new(),
            remote_branches: HashSet::new(),
            remotes: vec!["origin".to_string()],
            fail_acquire: false,
            fail_merge: false,
            acquired: 0,
            base: String::new(),
        }
    }
}

fn failed(args: &str) -> GitError {
    GitError::Command {
        args: args.to_string(),
        output: "fatal: simulated failure".to_string(),
    }
}

/// Hands out [`FakeCopy`]s that share one [`CopyState`]
///
/// Like the real cache, only one copy is handed out at a time.
#[derive(Debug, Default)]
pub struct FakeRepos {
    state: Arc<Mutex<CopyState>>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl FakeRepos {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, CopyState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl RepoProvider for FakeRepos {
    async fn acquire(&self, owner: &str, repo: &str) -> GitResult<Box<dyn WorkingCopy>> {
        if self.state().fail_acquire {
            return Err(failed("clone"));
        }
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.state().acquired += 1;
        Ok(Box::new(FakeCopy {
            dir: PathBuf::from("/cache").join(owner).join(repo),
            canonical_url: format!("https://github.com/{}/{}.git", owner, repo),
            state: Arc::clone(&self.state),
            _guard: guard,
        }))
    }
}

pub struct FakeCopy {
    dir: PathBuf,
    canonical_url: String,
    state: Arc<Mutex<CopyState>>,
    _guard: OwnedMutexGuard<()>,
}

impl FakeCopy {
    fn record(&self, entry: String) -> MutexGuard<'_, CopyState> {
        let mut state = self.state.lock().unwrap();
        state.log.push(entry);
        state
    }
}

#[async_trait]
impl WorkingCopy for FakeCopy {
    fn directory(&self) -> &Path {
        &self.dir
    }

    fn canonical_url(&self) -> String {
        self.canonical_url.clone()
    }

    async fn clean(&self) -> GitResult<()> {
        tokio::task::yield_now().await;
        self.record("clean".to_string());
        Ok(())
    }

    async fn checkout(&self, commitlike: &str) -> GitResult<()> {
        let mut state = self.record(format!("checkout {}", commitlike));
        state.base = commitlike.to_string();
        Ok(())
    }

    async fn checkout_new_branch(&self, branch: &str, force: bool) -> GitResult<()> {
        let flag = if force { "-B" } else { "-b" };
        self.record(format!("checkout {} {}", flag, branch));
        Ok(())
    }

    async fn fetch_pull_request(&self, number: u64) -> GitResult<()> {
        self.record(format!("fetch pull {}", number));
        Ok(())
    }

    async fn cherry_pick(&self, first: &str, last: &str, side: ConflictSide) -> GitResult<()> {
        tokio::task::yield_now().await;
        let state = self.record(format!(
            "cherry-pick {}^..{} {}",
            first,
            last,
            side.as_git_option()
        ));
        let target = state.base.trim_start_matches("origin/");
        if state.conflicts.contains(target) {
            return Err(failed("cherry-pick"));
        }
        Ok(())
    }

    async fn cherry_pick_abort(&self) -> GitResult<()> {
        self.record("cherry-pick --abort".to_string());
        Ok(())
    }

    async fn push(&self, refspec: &str, force: bool) -> GitResult<()> {
        tokio::task::yield_now().await;
        let suffix = if force { " force" } else { "" };
        self.record(format!("push {}{}", refspec, suffix));
        Ok(())
    }

    async fn delete_branch(&self, branch: &str, _force: bool) -> GitResult<()> {
        self.record(format!("branch --delete {}", branch));
        Ok(())
    }

    async fn delete_remote_branch(&self, branch: &str) -> GitResult<()> {
        let mut state = self.record(format!("push --delete {}", branch));
        state.remote_branches.remove(branch);
        Ok(())
    }

    async fn remote_branch_exists(&self, branch: &str) -> GitResult<bool> {
        Ok(self.state.lock().unwrap().remote_branches.contains(branch))
    }

    async fn list_remotes(&self) -> GitResult<Vec<String>> {
        Ok(self.state.lock().unwrap().remotes.clone())
    }

    async fn add_remote(&self, name: &str, url: &str) -> GitResult<()> {
        let mut state = self.record(format!("remote add {} {}", name, url));
        state.remotes.push(name.to_string());
        Ok(())
    }

    async fn fetch_remote_branch(&self, remote: &str, branch: &str) -> GitResult<()> {
        self.record(format!("fetch {} {}", remote, branch));
        Ok(())
    }

    async fn merge(&self, commitlike: &str, option: MergeOption) -> GitResult<()> {
        let state = self.record(format!("merge {:?} {}", option, commitlike));
        if state.fail_merge {
            return Err(failed("merge"));
        }
        Ok(())
    }

    async fn config(&self, key: &str, value: &str) -> GitResult<()> {
        self.record(format!("config {} {}", key, value));
        Ok(())
    }

    async fn status(&self) -> GitResult<String> {
        Ok(String::new())
    }
}

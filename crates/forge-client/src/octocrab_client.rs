//! Octocrab-based GitHub API client
//!
//! Direct implementation of the `ForgeClient` trait using the octocrab library.
//! Endpoints go through octocrab's typed builders and `octocrab::models`,
//! converted into our own types. Raw requests are only used where octocrab
//! has no builder for the endpoint.

use crate::client::{ForgeClient, ForgeError};
use crate::types::{
    Branch, Comment, CreatedPullRequest, Issue, NewPullRequest, PullRequest, PullRequestCommit,
    PullRequestState, User,
};
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use log::{debug, info};
use octocrab::models::{self, IssueState};
use octocrab::params::repos::Reference;
use octocrab::Octocrab;
use std::sync::Arc;

/// Public GitHub API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

const PER_PAGE: u8 = 100;

/// Direct GitHub API client using octocrab
#[derive(Debug, Clone)]
pub struct OctocrabClient {
    octocrab: Arc<Octocrab>,
}

impl OctocrabClient {
    /// Create a new client with the given octocrab instance
    pub fn new(octocrab: Arc<Octocrab>) -> Self {
        Self { octocrab }
    }

    /// Build an authenticated client
    ///
    /// # Arguments
    ///
    /// * `api_base_url` - API endpoint (None = public GitHub)
    /// * `token` - Personal access token of the bot account
    pub fn connect(api_base_url: Option<&str>, token: String) -> anyhow::Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token);

        let base_url = api_base_url.unwrap_or(DEFAULT_API_BASE_URL);
        if base_url != DEFAULT_API_BASE_URL {
            builder = builder
                .base_uri(base_url)
                .context("Failed to set base URI")?;
        }

        let octocrab = builder.build().context("Failed to build Octocrab client")?;
        info!("Forge client created for {}", base_url);
        Ok(Self::new(Arc::new(octocrab)))
    }
}

#[async_trait]
impl ForgeClient for OctocrabClient {
    async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        only_protected: bool,
    ) -> anyhow::Result<Vec<Branch>> {
        debug!("Listing branches for {}/{}", owner, repo);

        let repos = self.octocrab.repos(owner, repo);
        let mut request = repos.list_branches().per_page(PER_PAGE);
        if only_protected {
            request = request.protected(true);
        }
        let first = request
            .send()
            .await
            .with_context(|| format!("Failed to list branches of {}/{}", owner, repo))?;
        let branches = self
            .octocrab
            .all_pages(first)
            .await
            .with_context(|| format!("Failed to page branches of {}/{}", owner, repo))?;

        debug!("Fetched {} branches for {}/{}", branches.len(), owner, repo);
        Ok(branches.iter().map(convert_branch).collect())
    }

    async fn get_branch(&self, owner: &str, repo: &str, branch: &str) -> anyhow::Result<Branch> {
        // octocrab has no builder for a single branch
        let route = format!("/repos/{}/{}/branches/{}", owner, repo, branch);
        let found: models::repos::Branch = self
            .octocrab
            .get(route, None::<&()>)
            .await
            .map_err(|e| not_found_or(e, format!("branch {} of {}/{}", branch, owner, repo)))?;
        Ok(convert_branch(&found))
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> anyhow::Result<()> {
        debug!("Creating branch {} at {} in {}/{}", branch, sha, owner, repo);

        self.octocrab
            .repos(owner, repo)
            .create_ref(&Reference::Branch(branch.to_string()), sha)
            .await
            .with_context(|| format!("Failed to create branch {} in {}/{}", branch, owner, repo))?;
        Ok(())
    }

    async fn get_text_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> anyhow::Result<String> {
        let mut contents = self
            .octocrab
            .repos(owner, repo)
            .get_content()
            .path(path)
            .r#ref(git_ref)
            .send()
            .await
            .map_err(|e| not_found_or(e, format!("{}@{} in {}/{}", path, git_ref, owner, repo)))?;

        let file = contents
            .take_items()
            .into_iter()
            .find(|item| item.r#type == "file")
            .with_context(|| format!("{} is not a file in {}/{}", path, owner, repo))?;
        match (file.encoding.as_deref(), file.content) {
            (Some("base64"), Some(content)) => decode_base64_content(&content),
            (_, Some(content)) => Ok(content),
            (_, None) => anyhow::bail!("{} has no inline content", path),
        }
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<PullRequest> {
        let pr = self
            .octocrab
            .pulls(owner, repo)
            .get(number)
            .await
            .map_err(|e| not_found_or(e, format!("pull request {}/{}#{}", owner, repo, number)))?;
        Ok(convert_pull_request(&pr))
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        request: &NewPullRequest,
    ) -> anyhow::Result<CreatedPullRequest> {
        info!(
            "Creating pull request {} -> {} in {}/{}",
            request.head, request.base, owner, repo
        );

        let pr = self
            .octocrab
            .pulls(owner, repo)
            .create(&request.title, &request.head, &request.base)
            .body(request.body.as_str())
            .maintainer_can_modify(request.maintainer_can_modify)
            .send()
            .await
            .with_context(|| format!("Failed to create pull request in {}/{}", owner, repo))?;

        Ok(CreatedPullRequest {
            number: pr.number,
            html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        })
    }

    async fn close_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<()> {
        self.octocrab
            .pulls(owner, repo)
            .update(number)
            .state(octocrab::params::pulls::State::Closed)
            .send()
            .await
            .with_context(|| format!("Failed to close {}/{}#{}", owner, repo, number))?;
        Ok(())
    }

    async fn list_pull_request_commits(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<PullRequestCommit>> {
        let pulls = self.octocrab.pulls(owner, repo);
        let first = pulls
            .pr_commits(number)
            .per_page(PER_PAGE)
            .send()
            .await
            .with_context(|| format!("Failed to list commits of {}/{}#{}", owner, repo, number))?;
        let commits = self
            .octocrab
            .all_pages(first)
            .await
            .with_context(|| format!("Failed to page commits of {}/{}#{}", owner, repo, number))?;
        Ok(commits.iter().map(convert_commit).collect())
    }

    async fn list_pull_request_issues(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> anyhow::Result<Vec<Issue>> {
        // No REST endpoint lists the issues a pull request closes.
        Err(ForgeError::NotImplemented("list_pull_request_issues").into())
    }

    async fn list_pull_request_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<Comment>> {
        let issues = self.octocrab.issues(owner, repo);
        let first = issues
            .list_comments(number)
            .per_page(PER_PAGE)
            .send()
            .await
            .with_context(|| format!("Failed to list comments of {}/{}#{}", owner, repo, number))?;
        let comments = self
            .octocrab
            .all_pages(first)
            .await
            .with_context(|| format!("Failed to page comments of {}/{}#{}", owner, repo, number))?;
        Ok(comments.iter().map(convert_comment).collect())
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        self.octocrab
            .issues(owner, repo)
            .create_comment(number, body)
            .await
            .with_context(|| format!("Failed to comment on {}/{}#{}", owner, repo, number))?;
        Ok(())
    }
}

/// Map a 404 to `ForgeError::NotFound`, keep anything else as is
fn not_found_or(err: octocrab::Error, what: String) -> anyhow::Error {
    match &err {
        octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404 => {
            ForgeError::NotFound(what).into()
        }
        _ => anyhow::Error::new(err).context(format!("Failed to fetch {}", what)),
    }
}

fn convert_branch(branch: &models::repos::Branch) -> Branch {
    Branch {
        name: branch.name.clone(),
        protected: branch.protected,
    }
}

/// Convert octocrab PullRequest to our PullRequest type
fn convert_pull_request(pr: &models::pulls::PullRequest) -> PullRequest {
    let state = if pr.merged.unwrap_or(false) || pr.merged_at.is_some() {
        PullRequestState::Merged
    } else if pr.state == Some(IssueState::Closed) {
        PullRequestState::Closed
    } else {
        PullRequestState::Open
    };

    PullRequest {
        number: pr.number,
        title: pr.title.clone().unwrap_or_default(),
        body: pr.body.clone(),
        html_url: pr
            .html_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default(),
        head_ref: pr.head.ref_field.clone(),
        head_sha: pr.head.sha.clone(),
        base_ref: pr.base.ref_field.clone(),
        base_sha: pr.base.sha.clone(),
        state,
        mergeable: pr.mergeable,
    }
}

fn convert_comment(comment: &models::issues::Comment) -> Comment {
    Comment {
        id: comment.id.into_inner(),
        body: comment.body.clone().unwrap_or_default(),
        html_url: comment.html_url.to_string(),
        user: User {
            login: comment.user.login.clone(),
            html_url: comment.user.html_url.to_string(),
        },
        created_at: comment.created_at,
    }
}

fn convert_commit(commit: &models::repos::RepoCommit) -> PullRequestCommit {
    PullRequestCommit {
        sha: commit.sha.clone(),
        html_url: commit.html_url.clone(),
        message: commit.commit.message.clone(),
        authored_at: commit.commit.author.as_ref().and_then(|a| a.date),
    }
}

/// Decode file contents as returned by the contents endpoint
fn decode_base64_content(content: &str) -> anyhow::Result<String> {
    // GitHub wraps the payload at 60 columns
    let packed: String = content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(packed)
        .context("Invalid base64 in file contents")?;
    String::from_utf8(bytes).context("File is not valid UTF-8")
}

/// Decode a pull request object as GitHub sends it
///
/// Webhook payloads embed the same representation the REST API returns.
pub fn pull_request_from_json(value: serde_json::Value) -> serde_json::Result<PullRequest> {
    serde_json::from_value::<models::pulls::PullRequest>(value)
        .map(|pr| convert_pull_request(&pr))
}

/// Decode an issue comment object as GitHub sends it
pub fn comment_from_json(value: serde_json::Value) -> serde_json::Result<Comment> {
    serde_json::from_value::<models::issues::Comment>(value).map(|c| convert_comment(&c))
}

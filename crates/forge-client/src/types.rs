//! Forge API data transfer objects
//!
//! These types represent the data exchanged with the forge API.
//! They are intentionally separate from the wire models of any one
//! forge so the sync engine can be driven by fakes in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a pull request as far as the bot is concerned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    /// Open and accepting changes
    #[default]
    Open,
    /// Merged into its base branch
    Merged,
    /// Closed without being merged
    Closed,
}

/// A pull request (the triggering one, or one the bot created)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number (e.g., 123)
    pub number: u64,

    /// PR title
    pub title: String,

    /// PR body/description
    pub body: Option<String>,

    /// PR URL for humans
    pub html_url: String,

    /// Source branch name (e.g., "feature/foo")
    pub head_ref: String,

    /// Source commit SHA
    pub head_sha: String,

    /// Target branch name (e.g., "master")
    pub base_ref: String,

    /// Target commit SHA at the time the event was emitted
    pub base_sha: String,

    /// Open / merged / closed
    pub state: PullRequestState,

    /// Whether the forge considers the PR mergeable (None if not yet computed)
    pub mergeable: Option<bool>,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }

    pub fn is_merged(&self) -> bool {
        self.state == PullRequestState::Merged
    }
}

/// A branch of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch name
    pub name: String,

    /// Whether the forge flags the branch as protected
    #[serde(default)]
    pub protected: bool,
}

/// Author of a comment or commit on the forge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login name (what `@mentions` use)
    pub login: String,

    /// Profile URL
    #[serde(default)]
    pub html_url: String,
}

/// A conversation comment on a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Comment ID
    pub id: u64,

    /// Markdown body
    pub body: String,

    /// Link to the comment
    pub html_url: String,

    /// Comment author
    pub user: User,

    /// When the comment was posted
    pub created_at: DateTime<Utc>,
}

/// A commit that belongs to a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestCommit {
    /// Full commit SHA
    pub sha: String,

    /// Link to the commit
    pub html_url: String,

    /// Commit message
    pub message: String,

    /// Git author date
    pub authored_at: Option<DateTime<Utc>>,
}

impl PullRequestCommit {
    /// First eight characters of the SHA
    pub fn short_sha(&self) -> &str {
        let end = self.sha.len().min(8);
        &self.sha[..end]
    }
}

/// An issue linked to a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number or key as the forge reports it
    pub number: String,

    /// Issue title
    pub title: String,

    /// Link to the issue
    pub html_url: String,

    /// Issue state (e.g., "open")
    pub state: String,
}

/// Parameters for opening a pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// Source branch, optionally prefixed with `account:` for forks
    pub head: String,
    /// Target branch
    pub base: String,
    /// Allow maintainers of the base repository to push to the head branch
    pub maintainer_can_modify: bool,
}

/// A pull request the forge created for us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub html_url: String,
}

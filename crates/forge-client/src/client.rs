//! Forge client trait and error definitions
//!
//! This module defines the core `ForgeClient` trait that every forge
//! implementation must satisfy. The sync engine only ever talks to
//! `dyn ForgeClient`, so tests can swap in an in-memory fake.

use crate::types::{
    Branch, Comment, CreatedPullRequest, Issue, NewPullRequest, PullRequest, PullRequestCommit,
};
use async_trait::async_trait;
use thiserror::Error;

/// Typed failures a forge implementation may surface through `anyhow`
///
/// Callers that want to tolerate a missing capability can
/// `downcast_ref::<ForgeError>()` on the returned error.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// The forge (or this client) does not offer the operation
    #[error("{0} is not implemented by this forge client")]
    NotImplemented(&'static str),

    /// The forge answered, but the resource does not exist
    #[error("{0} not found")]
    NotFound(String),
}

/// Returns true if `err` is (or wraps) `ForgeError::NotImplemented`
pub fn is_not_implemented(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ForgeError>(),
        Some(ForgeError::NotImplemented(_))
    )
}

/// Returns true if `err` is (or wraps) `ForgeError::NotFound`
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ForgeError>(), Some(ForgeError::NotFound(_)))
}

/// Forge API client trait
///
/// Defines the interface the sync bot needs from the code-hosting
/// service. Implementations can be direct (hitting the API) or fakes.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow sharing across
/// the tasks that handle individual webhook deliveries.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    // === Repository ===

    /// List branches of a repository
    ///
    /// # Arguments
    ///
    /// * `owner` - Repository owner (user or organization)
    /// * `repo` - Repository name
    /// * `only_protected` - Restrict the result to protected branches
    async fn list_branches(
        &self,
        owner: &str,
        repo: &str,
        only_protected: bool,
    ) -> anyhow::Result<Vec<Branch>>;

    /// Fetch a single branch, failing if it does not exist (yet)
    async fn get_branch(&self, owner: &str, repo: &str, branch: &str) -> anyhow::Result<Branch>;

    /// Create `branch` pointing at commit `sha`
    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> anyhow::Result<()>;

    /// Fetch a text file at a given ref
    async fn get_text_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> anyhow::Result<String>;

    // === Pull requests ===

    /// Fetch a single pull request by number
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<PullRequest>;

    /// Open a pull request
    ///
    /// May fail transiently right after the head branch was pushed,
    /// callers are expected to retry.
    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        request: &NewPullRequest,
    ) -> anyhow::Result<CreatedPullRequest>;

    /// Close a pull request without merging
    async fn close_pull_request(&self, owner: &str, repo: &str, number: u64)
        -> anyhow::Result<()>;

    /// List commits of a pull request, oldest first
    async fn list_pull_request_commits(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<PullRequestCommit>>;

    /// List issues linked to a pull request
    async fn list_pull_request_issues(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<Issue>>;

    // === Comments ===

    /// List conversation comments of a pull request, oldest first
    async fn list_pull_request_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<Comment>>;

    /// Post a conversation comment on a pull request
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_is_not_implemented() {
        let err = anyhow::Error::new(ForgeError::NotImplemented("list_pull_request_issues"));
        assert!(is_not_implemented(&err));
        assert_eq!(
            err.to_string(),
            "list_pull_request_issues is not implemented by this forge client"
        );
    }

    #[test]
    fn test_is_not_implemented_through_context() {
        let result: anyhow::Result<()> =
            Err(ForgeError::NotImplemented("get_text_file").into());
        let err = result.context("loading spec file").unwrap_err();
        assert!(is_not_implemented(&err));
    }

    #[test]
    fn test_other_errors_are_not_not_implemented() {
        let err = anyhow::Error::new(ForgeError::NotFound("branch foo".to_string()));
        assert!(!is_not_implemented(&err));
        assert!(!is_not_implemented(&anyhow::anyhow!("boom")));
    }

    #[test]
    fn test_is_not_found() {
        let err = anyhow::Error::new(ForgeError::NotFound("pull request #7".to_string()));
        assert!(is_not_found(&err));
        assert_eq!(err.to_string(), "pull request #7 not found");
        assert!(!is_not_found(&ForgeError::NotImplemented("get_branch").into()));
        assert!(!is_not_found(&anyhow::anyhow!("boom")));
    }
}

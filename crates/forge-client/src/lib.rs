//! Forge API contract for sync-bot
//!
//! This crate provides the trait-based forge client the sync engine talks
//! to, an octocrab-backed implementation for GitHub, and the credential
//! plumbing shared by API calls and git pushes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              ForgeClient trait                   │
//! │  - branches / pull requests / comments           │
//! └─────────────────────────────────────────────────┘
//!                        │
//!        ┌───────────────┴───────────────┐
//!        ▼                               ▼
//! ┌─────────────────┐         ┌─────────────────────┐
//! │ OctocrabClient  │         │ in-memory fakes     │
//! │ (GitHub API)    │         │ (tests)             │
//! └─────────────────┘         └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use forge_client::{ForgeClient, OctocrabClient, TokenResolver};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let token = TokenResolver::new(None).resolve("github.com")?;
//! let client = OctocrabClient::connect(None, token)?;
//!
//! let branches = client.list_branches("owner", "repo", true).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credentials;
pub mod octocrab_client;
pub mod types;

pub use client::{is_not_found, is_not_implemented, ForgeClient, ForgeError};
pub use credentials::{
    Anonymous, CredentialProvider, Credentials, RotatingCredentials, TokenResolver, DEFAULT_HOST,
};
pub use octocrab_client::{
    comment_from_json, pull_request_from_json, OctocrabClient, DEFAULT_API_BASE_URL,
};
pub use types::{
    Branch, Comment, CreatedPullRequest, Issue, NewPullRequest, PullRequest, PullRequestCommit,
    PullRequestState, User,
};

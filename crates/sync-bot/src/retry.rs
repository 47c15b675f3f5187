//! Bounded retry with exponential backoff
//!
//! Used for remote operations that are expected to fail transiently:
//! clone/fetch against the forge, and pull request creation right after a
//! push (the forge needs a moment before the new branch is visible).
//! Local git operations are never retried.

use log::{debug, warn};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use sync_bot_config::RetrySettings;

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Sleep after the first failure, doubled after every further failure
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Clone and fetch
    pub const GIT_NETWORK: Self = Self {
        max_attempts: 3,
        initial_backoff: Duration::from_secs(1),
    };

    /// Pull request creation and branch visibility polling
    pub const PULL_REQUEST: Self = Self {
        max_attempts: 5,
        initial_backoff: Duration::from_secs(1),
    };
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff: settings.initial_backoff(),
        }
    }
}

/// Run `op` until it succeeds or the policy is exhausted
///
/// Returns the first success, or the error of the last attempt. There is
/// no sleep after the final attempt. A policy with zero attempts still
/// runs `op` once.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(err) if attempt >= max_attempts => {
                warn!("{} failed after {} attempts: {}", label, attempt, err);
                return Err(err);
            }
            Err(err) => {
                debug!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, max_attempts, backoff, err
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

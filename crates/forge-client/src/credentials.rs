//! Bot credentials
//!
//! The same token authenticates API calls and git pushes. It is resolved
//! once at startup and kept behind a lock so it can be rotated while
//! requests are in flight.

use anyhow::{Context, Result};
use log::debug;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Default forge host (public GitHub)
pub const DEFAULT_HOST: &str = "github.com";

/// Username and secret used for authenticated pushes
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

// Never print the secret
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

/// Source of the current push credentials
///
/// Returning `None` means pushes go to the plain remote URL.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

/// No credentials at all (local remotes, tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn credentials(&self) -> Option<Credentials> {
        None
    }
}

/// Credentials that can be swapped at runtime
///
/// Cloning shares the underlying slot.
#[derive(Debug, Clone, Default)]
pub struct RotatingCredentials {
    inner: Arc<RwLock<Option<Credentials>>>,
}

impl RotatingCredentials {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Replace the current credentials
    pub fn rotate(&self, credentials: Credentials) {
        debug!("Rotating credentials for {}", credentials.username);
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(credentials);
    }
}

impl CredentialProvider for RotatingCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Resolves the bot token for a forge host
///
/// Tries multiple sources in order:
/// 1. Host-specific env var (e.g., `SYNC_BOT_TOKEN_GHE_EXAMPLE_COM`)
/// 2. `SYNC_BOT_TOKEN`
/// 3. `GITHUB_TOKEN`
/// 4. The configured token file
#[derive(Debug, Clone, Default)]
pub struct TokenResolver {
    token_file: Option<PathBuf>,
}

impl TokenResolver {
    /// Create a new token resolver
    ///
    /// # Arguments
    ///
    /// * `token_file` - File holding the token, consulted last
    pub fn new(token_file: Option<PathBuf>) -> Self {
        Self { token_file }
    }

    /// Env var consulted first for `host`
    pub fn host_env_key(host: &str) -> String {
        format!(
            "SYNC_BOT_TOKEN_{}",
            host.replace(['.', '-', ':'], "_").to_uppercase()
        )
    }

    /// Get a token for the given host
    pub fn resolve(&self, host: &str) -> Result<String> {
        let env_key = Self::host_env_key(host);
        for key in [env_key.as_str(), "SYNC_BOT_TOKEN", "GITHUB_TOKEN"] {
            if let Ok(token) = std::env::var(key) {
                let token = token.trim();
                if !token.is_empty() {
                    debug!("Using token from env var {} for host {}", key, host);
                    return Ok(token.to_string());
                }
            }
        }

        if let Some(path) = &self.token_file {
            let token = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read token file {}", path.display()))?;
            let token = token.trim();
            if !token.is_empty() {
                debug!("Using token from {} for host {}", path.display(), host);
                return Ok(token.to_string());
            }
        }

        Err(anyhow::anyhow!(
            "No token found for host '{}'. Set {} or SYNC_BOT_TOKEN, or configure token_file",
            host,
            env_key
        ))
    }
}

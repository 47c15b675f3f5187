//! Bot configuration
//!
//! Configuration loaded from .sync-bot.toml. Every field has a default,
//! so an empty file (or no file at all) yields a working setup for
//! public GitHub.

use crate::config_file::load_config_file;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not determine a cache directory, set cache_root explicitly")]
    NoCacheDir,
}

/// How changes of a pull request are carried over to another branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Replay the pull request's commits on top of the target branch
    #[serde(rename = "pick")]
    CherryPick,
    /// Branch off the pull request head and propose it against the target
    #[default]
    #[serde(rename = "branch")]
    DirectBranch,
    /// Replace the target with the pull request head
    #[serde(rename = "overwrite")]
    Overwrite,
}

impl SyncStrategy {
    /// Look up a strategy by the name used in commands and config
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pick" => Some(Self::CherryPick),
            "branch" => Some(Self::DirectBranch),
            "overwrite" => Some(Self::Overwrite),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CherryPick => "pick",
            Self::DirectBranch => "branch",
            Self::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side wins a conflicting hunk during cherry-pick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSide {
    Ours,
    #[default]
    Theirs,
}

impl ConflictSide {
    /// Value for `git cherry-pick --strategy-option=`
    pub fn as_git_option(&self) -> &'static str {
        match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
        }
    }
}

/// A repository too large to clone from the canonical location
///
/// The bot works in a fork owned by `overflow_account` and keeps the
/// fork's branches refreshed from the canonical repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeRepository {
    pub owner: String,
    pub repo: String,
    pub overflow_account: String,
    /// Do not `git fetch` on cache hit
    #[serde(default = "default_true")]
    pub skip_refresh: bool,
}

impl LargeRepository {
    pub fn matches(&self, owner: &str, repo: &str) -> bool {
        self.owner == owner && self.repo == repo
    }
}

/// The entry of `large_repositories` for `owner/repo`, if any
pub fn find_large_repository<'a>(
    large_repositories: &'a [LargeRepository],
    owner: &str,
    repo: &str,
) -> Option<&'a LargeRepository> {
    large_repositories
        .iter()
        .find(|large| large.matches(owner, repo))
}

/// Bounded exponential backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Bot configuration loaded from .sync-bot.toml
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BotConfig {
    /// Forge host name (e.g., "github.com" or a GitHub Enterprise host)
    #[serde(default = "default_forge_host")]
    pub forge_host: String,

    /// REST API endpoint, derived from the host when unset
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Base URL repositories are cloned from, `https://<forge_host>` when unset
    #[serde(default)]
    pub git_base_url: Option<String>,

    /// Where working copies are cached
    #[serde(default)]
    pub cache_root: Option<PathBuf>,

    /// File holding the bot token, used when no token env var is set
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Login of the bot account, used as git push username
    #[serde(default = "default_bot_user")]
    pub bot_user: String,

    /// Committer email for cherry-picked commits, git's own setting when unset
    #[serde(default)]
    pub bot_email: Option<String>,

    /// Strategy used when a `/sync` command does not name one
    #[serde(default)]
    pub default_strategy: SyncStrategy,

    /// Side that wins conflicting hunks during cherry-pick
    #[serde(default)]
    pub conflict_side: ConflictSide,

    /// Comment posted on pull requests the bot opened
    #[serde(default = "default_courtesy_comment")]
    pub courtesy_comment: String,

    /// Delay before posting the courtesy comment
    #[serde(default = "default_courtesy_delay_secs")]
    pub courtesy_delay_secs: u64,

    /// Owners ("acme") or repositories ("acme/widget") the bot stays away from
    #[serde(default)]
    pub ignored_repositories: Vec<String>,

    #[serde(default)]
    pub large_repositories: Vec<LargeRepository>,

    /// Retry policy for clone and fetch
    #[serde(default = "default_git_retry")]
    pub git_retry: RetrySettings,

    /// Retry policy for pull request creation and branch visibility polling
    #[serde(default = "default_pull_request_retry")]
    pub pull_request_retry: RetrySettings,

    /// Default log level, `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_forge_host() -> String {
    "github.com".to_string()
}

fn default_bot_user() -> String {
    "sync-bot".to_string()
}

fn default_courtesy_comment() -> String {
    "/check-cla".to_string()
}

fn default_courtesy_delay_secs() -> u64 {
    10
}

fn default_git_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        initial_backoff_ms: 1000,
    }
}

fn default_pull_request_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 5,
        initial_backoff_ms: 1000,
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            forge_host: default_forge_host(),
            api_base_url: None,
            git_base_url: None,
            cache_root: None,
            token_file: None,
            bot_user: default_bot_user(),
            bot_email: None,
            default_strategy: SyncStrategy::default(),
            conflict_side: ConflictSide::default(),
            courtesy_comment: default_courtesy_comment(),
            courtesy_delay_secs: default_courtesy_delay_secs(),
            ignored_repositories: Vec::new(),
            large_repositories: Vec::new(),
            git_retry: default_git_retry(),
            pull_request_retry: default_pull_request_retry(),
            log_level: default_log_level(),
        }
    }
}

impl BotConfig {
    /// Load config from `explicit`, else CWD, else home directory, else defaults
    ///
    /// A file that exists but does not parse is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match load_config_file(explicit)? {
            Some((path, content)) => {
                let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
                log::info!("Loaded bot config from {}", path.display());
                Ok(config)
            }
            None => {
                log::debug!("Using default bot config");
                Ok(Self::default())
            }
        }
    }

    /// Base URL for git remotes, without trailing slash
    pub fn git_base_url(&self) -> String {
        match &self.git_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.forge_host),
        }
    }

    /// API endpoint, None for public GitHub
    pub fn api_base_url(&self) -> Option<String> {
        match &self.api_base_url {
            Some(url) => Some(url.trim_end_matches('/').to_string()),
            None if self.forge_host == "github.com" => None,
            None => Some(format!("https://{}/api/v3", self.forge_host)),
        }
    }

    /// Directory holding the cached working copies
    pub fn cache_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache_root {
            Some(root) => Ok(root.clone()),
            None => paths::default_cache_root().ok_or(ConfigError::NoCacheDir),
        }
    }

    pub fn courtesy_delay(&self) -> Duration {
        Duration::from_secs(self.courtesy_delay_secs)
    }

    /// Whether events for `owner/repo` should be dropped
    pub fn is_ignored(&self, owner: &str, repo: &str) -> bool {
        self.ignored_repositories.iter().any(|entry| {
            match entry.split_once('/') {
                Some((o, r)) => o == owner && r == repo,
                None => entry == owner,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.forge_host, "github.com");
        assert_eq!(config.default_strategy, SyncStrategy::DirectBranch);
        assert_eq!(config.conflict_side, ConflictSide::Theirs);
        assert_eq!(config.courtesy_comment, "/check-cla");
        assert_eq!(config.courtesy_delay(), Duration::from_secs(10));
        assert_eq!(config.git_retry.max_attempts, 3);
        assert_eq!(config.pull_request_retry.max_attempts, 5);
        assert_eq!(config.git_retry.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.git_base_url(), "https://github.com");
        assert_eq!(config.api_base_url(), None);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml = r#"
            forge_host = "ghe.example.com"
            default_strategy = "pick"
            conflict_side = "ours"
            ignored_repositories = ["acme", "other/skip-me"]

            [[large_repositories]]
            owner = "acme"
            repo = "kernel"
            overflow_account = "acme-sync-bot"

            [pull_request_retry]
            max_attempts = 2
            initial_backoff_ms = 10
        "#;
        let config: BotConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.default_strategy, SyncStrategy::CherryPick);
        assert_eq!(config.conflict_side, ConflictSide::Ours);
        assert_eq!(config.pull_request_retry.max_attempts, 2);
        // Untouched fields keep defaults
        assert_eq!(config.git_retry.max_attempts, 3);
        assert_eq!(config.bot_user, "sync-bot");
        assert_eq!(
            config.api_base_url().as_deref(),
            Some("https://ghe.example.com/api/v3")
        );

        let large = find_large_repository(&config.large_repositories, "acme", "kernel").unwrap();
        assert_eq!(large.overflow_account, "acme-sync-bot");
        assert!(large.skip_refresh);
        assert!(find_large_repository(&config.large_repositories, "acme", "docs").is_none());
    }

    #[test]
    fn test_is_ignored() {
        let config = BotConfig {
            ignored_repositories: vec!["acme".to_string(), "other/skip-me".to_string()],
            ..BotConfig::default()
        };
        assert!(config.is_ignored("acme", "anything"));
        assert!(config.is_ignored("other", "skip-me"));
        assert!(!config.is_ignored("other", "keep-me"));
        assert!(!config.is_ignored("acme-labs", "widget"));
    }

    #[test]
    fn test_git_base_url_override_trims_slash() {
        let config = BotConfig {
            git_base_url: Some("file:///srv/git/".to_string()),
            ..BotConfig::default()
        };
        assert_eq!(config.git_base_url(), "file:///srv/git");
    }

    #[test]
    fn test_strategy_names() {
        for strategy in [
            SyncStrategy::CherryPick,
            SyncStrategy::DirectBranch,
            SyncStrategy::Overwrite,
        ] {
            assert_eq!(SyncStrategy::from_name(strategy.name()), Some(strategy));
        }
        assert_eq!(SyncStrategy::from_name("rebase"), None);
        assert_eq!(SyncStrategy::CherryPick.to_string(), "pick");
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bot_user = \"acme-bot\"").unwrap();

        let config = BotConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bot_user, "acme-bot");
    }

    #[test]
    fn test_load_invalid_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_strategy = \"rebase\"").unwrap();

        let err = BotConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_explicit_file_is_error() {
        let err = BotConfig::load(Some(Path::new("/nonexistent/sync-bot.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

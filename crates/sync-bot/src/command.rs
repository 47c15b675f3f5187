//! Comment command grammar
//!
//! Recognizes the bot's slash commands in pull request comments, the
//! title marker of bot-authored pull requests and the names of the
//! temporary sync branches, and turns `/sync` comments into a
//! [`SyncRequest`].
//!
//! Options after `/sync` follow the conventions of Go's `flag` package:
//! `-name value`, `--name value`, `-name=value` and `--name=value` are all
//! accepted, option parsing stops at the first non-option token or `--`.

use regex::Regex;
use sync_bot_config::SyncStrategy;
use thiserror::Error;

/// A parsed `/sync` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub strategy: SyncStrategy,
    /// Target branches in command order, duplicates kept
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("not a /sync command")]
    NotSyncCommand,

    #[error("flag provided but not defined: {0}")]
    UnknownFlag(String),

    #[error("flag needs an argument: {0}")]
    MissingValue(String),

    #[error("bad flag syntax: {0}")]
    BadFlagSyntax(String),

    #[error("unknown strategy {0:?}, expected one of pick, branch, overwrite")]
    UnknownStrategy(String),
}

/// Matchers for commands, titles and branch names
#[derive(Debug, Clone)]
pub struct CommandParser {
    title: Regex,
    sync_check: Regex,
    sync: Regex,
    close: Regex,
    sync_branch: Regex,
    default_strategy: SyncStrategy,
}

impl CommandParser {
    pub fn new(default_strategy: SyncStrategy) -> Result<Self, regex::Error> {
        Ok(Self {
            title: Regex::new(r"^(\[sync-bot\]|\[sync\])")?,
            sync_check: Regex::new(r"^\s*/sync-check\s*$")?,
            sync: Regex::new(r"^\s*/sync([ \t]+[A-Za-z0-9_./-]+)+\s*$")?,
            close: Regex::new(r"^\s*/close\s*$")?,
            sync_branch: Regex::new(r"^sync-pr\d+-.+-to-.+$")?,
            default_strategy,
        })
    }

    /// Title of a pull request the bot opened
    pub fn matches_title(&self, title: &str) -> bool {
        self.title.is_match(title)
    }

    pub fn matches_sync_check(&self, body: &str) -> bool {
        self.sync_check.is_match(body)
    }

    /// `/sync` followed by at least one token
    pub fn matches_sync(&self, body: &str) -> bool {
        self.sync.is_match(body)
    }

    pub fn matches_close(&self, body: &str) -> bool {
        self.close.is_match(body)
    }

    /// Temporary branch created by a cherry-pick sync
    pub fn matches_sync_branch(&self, branch: &str) -> bool {
        self.sync_branch.is_match(branch)
    }

    /// Parse a `/sync` command into a request
    ///
    /// A bare `/sync` yields an empty branch list.
    pub fn parse(&self, text: &str) -> Result<SyncRequest, CommandParseError> {
        let mut tokens = text
            .trim()
            .split([' ', '\t'])
            .filter(|t| !t.is_empty());

        if tokens.next() != Some("/sync") {
            return Err(CommandParseError::NotSyncCommand);
        }

        let mut strategy = self.default_strategy;
        let mut branches = Vec::new();

        while let Some(token) = tokens.next() {
            if token == "--" {
                break;
            }
            // A lone "-" is an argument
            if !token.starts_with('-') || token.len() == 1 {
                branches.push(token.to_string());
                break;
            }

            let name = token
                .strip_prefix("--")
                .unwrap_or_else(|| &token[1..]);
            if name.is_empty() || name.starts_with('-') || name.starts_with('=') {
                return Err(CommandParseError::BadFlagSyntax(token.to_string()));
            }

            let (name, inline_value) = match name.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (name, None),
            };

            match name {
                "strategy" | "s" => {
                    let value = match inline_value {
                        Some(value) => value,
                        None => tokens
                            .next()
                            .ok_or_else(|| CommandParseError::MissingValue(name.to_string()))?,
                    };
                    strategy = SyncStrategy::from_name(value)
                        .ok_or_else(|| CommandParseError::UnknownStrategy(value.to_string()))?;
                }
                _ => return Err(CommandParseError::UnknownFlag(name.to_string())),
            }
        }

        branches.extend(tokens.map(str::to_string));
        Ok(SyncRequest { strategy, branches })
    }
}

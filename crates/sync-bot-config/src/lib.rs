//! Configuration for sync-bot
//!
//! This crate provides:
//! - Configuration file discovery and loading (TOML)
//! - Bot configuration (BotConfig) and the plain-data settings it carries
//! - Cache directory defaults

pub mod bot_config;
pub mod config_file;
pub mod paths;

pub use bot_config::{
    find_large_repository, BotConfig, ConfigError, ConflictSide, LargeRepository, RetrySettings,
    SyncStrategy,
};
pub use config_file::load_config_file;

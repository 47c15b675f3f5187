//! Data directory paths
//!
//! Uses XDG directories via `dirs` crate.
//!
//! Platform-specific locations:
//! - Linux: `~/.cache/sync-bot/`
//! - macOS: `~/Library/Caches/sync-bot/`
//! - Windows: `%LOCALAPPDATA%\sync-bot\`

use std::path::PathBuf;

const APP_NAME: &str = "sync-bot";

/// Get the application cache directory (not created)
pub fn cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|base| base.join(APP_NAME))
}

/// Default root for cached working copies
pub fn default_cache_root() -> Option<PathBuf> {
    cache_dir().map(|dir| dir.join("repos"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_root_layout() {
        if let Some(root) = default_cache_root() {
            assert!(root.ends_with("sync-bot/repos"));
        }
    }
}

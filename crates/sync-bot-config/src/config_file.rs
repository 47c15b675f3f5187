use crate::bot_config::ConfigError;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = ".sync-bot.toml";

/// Places searched for `.sync-bot.toml` when no path is given, in order
fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE)];
    paths.extend(dirs::home_dir().map(|home| home.join(CONFIG_FILE)));
    paths
}

/// Load config file content
///
/// An explicit path must exist. Otherwise the working directory and then
/// the home directory are searched, and a missing file is not an error.
///
/// Returns the path and content if found, None otherwise.
pub fn load_config_file(explicit: Option<&Path>) -> Result<Option<(PathBuf, String)>, ConfigError> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        return Ok(Some((path.to_path_buf(), content)));
    }

    for path in search_paths() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            log::debug!("Loaded config from {}", path.display());
            return Ok(Some((path, content)));
        }
    }

    log::debug!("No {} found, using defaults", CONFIG_FILE);
    Ok(None)
}

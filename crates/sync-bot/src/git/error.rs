use std::path::PathBuf;
use thiserror::Error;

/// Errors from driving the git binary
///
/// Arguments and output are already scrubbed of embedded credentials.
#[derive(Debug, Error)]
pub enum GitError {
    /// git ran and exited non-zero
    #[error("git {args} failed: {output}")]
    Command { args: String, output: String },

    /// git could not be started at all
    #[error("failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GitError>;

//! Error types for the packager crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building an artifact
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Archive error
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Path does not exist
    #[error("path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    /// Failed to copy a file or directory into the workspace
    #[error("failed to copy {}: {source}", .path.display())]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fetching source from a repository failed
    #[error("failed to fetch {url}: {stderr}")]
    FetchFailed { url: String, stderr: String },

    /// Rebuilding a native dependency failed
    #[error("failed to rebuild {package}: {message}")]
    RebuildFailed { package: String, message: String },

    /// Invalid path (absolute or escaping the workspace)
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for packager operations
pub type Result<T> = std::result::Result<T, Error>;

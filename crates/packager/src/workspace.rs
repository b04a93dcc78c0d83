//! Scoped build directories.
//!
//! A [`Workspace`] is a uniquely named directory under a caller-supplied
//! parent and is removed when dropped, so a failed build never leaves a
//! half-populated tree behind. Builds sharing a parent and a name prefix
//! each get their own directory.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Subdirectory holding the tree that gets archived
const BUNDLE_DIR: &str = "bundle";

/// Subdirectory used by rebuilds, never archived
const STAGING_DIR: &str = "staging";

/// A temporary build directory with a bundle tree and a staging area.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    dir: Option<TempDir>,
}

impl Workspace {
    /// Create a fresh directory under `parent` whose name starts with `prefix`.
    pub fn create(parent: &Path, prefix: &str) -> Result<Self> {
        if prefix.is_empty() || prefix.contains(['/', '\\']) || prefix == ".." {
            return Err(Error::InvalidPath(prefix.to_string()));
        }

        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(parent)?;
        let root = dir.path().to_path_buf();

        fs::create_dir_all(root.join(BUNDLE_DIR))?;
        fs::create_dir_all(root.join(STAGING_DIR))?;
        log::debug!("Created workspace {}", root.display());

        Ok(Self {
            root,
            dir: Some(dir),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory whose contents become the archive
    pub fn bundle_dir(&self) -> PathBuf {
        self.root.join(BUNDLE_DIR)
    }

    /// Scratch directory for rebuilt packages
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Empty the staging area between rebuilds.
    pub fn reset_staging(&self) -> Result<PathBuf> {
        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        Ok(staging)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(e) = dir.close()
        {
            log::warn!("Failed to remove workspace {}: {e}", self.root.display());
        }
    }
}

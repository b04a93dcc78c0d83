//! Populating the bundle tree from sources and installed packages.

use crate::error::{Error, Result};
use crate::types::SourceRef;
use std::fs;
use std::path::{Component, Path};
use std::process::Command;
use walkdir::WalkDir;

/// Fetch `source` into `dest`, leaving no version-control metadata behind.
pub fn materialize(source: &SourceRef, dest: &Path) -> Result<u64> {
    match source {
        SourceRef::Git { url, rev } => {
            clone(url, rev.as_deref(), dest)?;
            let git_dir = dest.join(".git");
            if git_dir.exists() {
                fs::remove_dir_all(&git_dir)?;
            }
            count_files(dest)
        }
        SourceRef::Directory(path) => {
            if !path.is_dir() {
                return Err(Error::PathNotFound(path.clone()));
            }
            copy_tree(path, dest, |rel| {
                rel.components().next() != Some(Component::Normal(".git".as_ref()))
            })
        }
    }
}

fn clone(url: &str, rev: Option<&str>, dest: &Path) -> Result<()> {
    let dest_str = dest.to_string_lossy();
    let mut args = vec!["clone", "--quiet"];
    if rev.is_none() {
        args.extend(["--depth", "1"]);
    }
    args.extend([url, dest_str.as_ref()]);

    log::info!("Cloning {url}");
    run_git(url, &args)?;

    if let Some(rev) = rev {
        log::debug!("Checking out {rev}");
        run_git(url, &["-C", dest_str.as_ref(), "checkout", "--quiet", rev])?;
    }
    Ok(())
}

fn run_git(url: &str, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|e| Error::FetchFailed {
            url: url.to_string(),
            stderr: format!("failed to execute git: {e}"),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(Error::FetchFailed {
            url: url.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Copy every entry under `src` accepted by `keep` into `dest`, overwriting
/// existing files. `keep` sees paths relative to `src`.
///
/// Returns the number of files copied.
pub fn copy_tree<F>(src: &Path, dest: &Path, keep: F) -> Result<u64>
where
    F: Fn(&Path) -> bool,
{
    let mut copied = 0u64;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(src)
                .map(|rel| keep(rel))
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|source| Error::CopyFailed {
                path: entry.path().to_path_buf(),
                source,
            })?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|source| Error::CopyFailed {
                path: entry.path().to_path_buf(),
                source,
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Whether a top-level entry of an install directory is package metadata.
pub fn is_metadata_entry(name: &str) -> bool {
    name.contains("-info") || name.contains("egg")
}

/// Merge the top-level entries of an install directory into `dest`.
///
/// Directories replace any existing directory of the same name; files
/// overwrite. Metadata entries are skipped.
pub fn merge_installed(install_dir: &Path, dest: &Path) -> Result<usize> {
    if !install_dir.is_dir() {
        return Err(Error::PathNotFound(install_dir.to_path_buf()));
    }

    let mut names: Vec<_> = fs::read_dir(install_dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.file_name())
        .collect();
    names.sort();

    let mut merged = 0;
    for name in names {
        let name_str = name.to_string_lossy();
        if is_metadata_entry(&name_str) {
            log::trace!("Skipping metadata entry {name_str}");
            continue;
        }

        let src = install_dir.join(&name);
        let target = dest.join(&name);

        if src.is_dir() {
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            }
            fs::create_dir_all(&target)?;
            copy_tree(&src, &target, |_| true)?;
        } else {
            fs::copy(&src, &target).map_err(|source| Error::CopyFailed { path: src, source })?;
        }
        merged += 1;
    }

    Ok(merged)
}

/// Resolve a user-supplied relative path inside `root`.
///
/// Absolute paths and `..` components are rejected.
pub fn contained_path(root: &Path, relative: &str) -> Result<std::path::PathBuf> {
    let rel = Path::new(relative);
    let valid = !relative.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !valid {
        return Err(Error::InvalidPath(relative.to_string()));
    }
    Ok(root.join(rel))
}

fn count_files(root: &Path) -> Result<u64> {
    let mut count = 0;
    for entry in WalkDir::new(root).min_depth(1) {
        if entry?.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

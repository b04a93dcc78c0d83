//! Data types for the packager crate

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

/// Where the deployable source tree comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    /// A repository URL, optionally pinned to a revision
    Git { url: String, rev: Option<String> },
    /// A local directory
    Directory(PathBuf),
}

impl SourceRef {
    /// Interpret a source string from configuration.
    ///
    /// URLs (`https://`, `ssh://`, `git@host:` or a `.git` suffix) are
    /// repositories; `url#rev` pins a revision. Anything else is a local
    /// directory.
    pub fn parse(source: &str) -> Self {
        let looks_remote = source.contains("://")
            || source.starts_with("git@")
            || source.trim_end_matches('/').ends_with(".git");

        if !looks_remote {
            return SourceRef::Directory(PathBuf::from(source));
        }

        match source.split_once('#') {
            Some((url, rev)) if !rev.is_empty() => SourceRef::Git {
                url: url.to_string(),
                rev: Some(rev.to_string()),
            },
            _ => SourceRef::Git {
                url: source.trim_end_matches('#').to_string(),
                rev: None,
            },
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Git { url, rev: Some(rev) } => write!(f, "{url}#{rev}"),
            SourceRef::Git { url, rev: None } => write!(f, "{url}"),
            SourceRef::Directory(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A package that links against system shared libraries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeDependency {
    /// Package name handed to the rebuilder
    pub package: String,
    /// Substrings identifying the shared libraries it needs
    pub library_fragments: Vec<String>,
}

/// Everything needed to build one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    /// Source tree to bundle
    pub source: SourceRef,
    /// Directory of installed runtime libraries merged into the bundle root
    pub runtime_libs: Option<PathBuf>,
    /// Paths (relative to the bundle root) removed before archiving
    #[serde(default)]
    pub ignored_paths: Vec<String>,
    /// Files copied into the bundle root by base name
    #[serde(default)]
    pub extra_files: Vec<PathBuf>,
    /// Packages rebuilt against the bundled shared libraries
    #[serde(default)]
    pub native_dependencies: Vec<NativeDependency>,
}

impl PackageRequest {
    /// Request that bundles only a source tree.
    pub fn from_source(source: SourceRef) -> Self {
        Self {
            source,
            runtime_libs: None,
            ignored_paths: Vec::new(),
            extra_files: Vec::new(),
            native_dependencies: Vec::new(),
        }
    }

    /// Name prefix for this request's workspace directories.
    ///
    /// Each build appends a unique suffix, so equal prefixes never share a
    /// directory.
    pub fn workspace_prefix(&self) -> String {
        let digest = blake3::hash(self.source.to_string().as_bytes()).to_hex();
        format!("skyward-{}", &digest[..12])
    }
}

/// A built zip archive and its checksum
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    bytes: Vec<u8>,
    checksum: String,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.bytes.len())
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl Artifact {
    /// Wrap archive bytes, computing their BLAKE3 checksum.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let checksum = blake3::hash(&bytes).to_hex().to_string();
        Self { bytes, checksum }
    }

    /// Read a previously built archive from disk.
    pub fn read_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(crate::Error::PathNotFound(path.to_path_buf()));
        }
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    /// Write the archive to disk.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// BLAKE3 hex digest of the archive bytes
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Archive entries mapped to the BLAKE3 digest of their contents.
    ///
    /// Two builds from identical inputs agree on this map even when the
    /// archive bytes differ (timestamps, entry order).
    pub fn entries(&self) -> Result<BTreeMap<String, String>> {
        let mut archive = zip::ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;
        let mut entries = BTreeMap::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let mut content = Vec::new();
            file.read_to_end(&mut content)?;
            entries.insert(
                file.name().to_string(),
                blake3::hash(&content).to_hex().to_string(),
            );
        }

        Ok(entries)
    }

    /// Digest over the sorted entry set, independent of archive layout.
    pub fn content_digest(&self) -> Result<String> {
        let mut hasher = blake3::Hasher::new();
        for (name, digest) in self.entries()? {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(digest.as_bytes());
            hasher.update(&[0]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Steps of a package build, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageStep {
    Source,
    RuntimeLibraries,
    IgnoredPaths,
    SharedLibraries,
    Rebuild(String),
    ExtraFiles,
    Archive,
}

impl fmt::Display for PackageStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageStep::Source => write!(f, "fetching source"),
            PackageStep::RuntimeLibraries => write!(f, "copying runtime libraries"),
            PackageStep::IgnoredPaths => write!(f, "removing ignored paths"),
            PackageStep::SharedLibraries => write!(f, "collecting shared libraries"),
            PackageStep::Rebuild(package) => write!(f, "rebuilding {package}"),
            PackageStep::ExtraFiles => write!(f, "adding extra files"),
            PackageStep::Archive => write!(f, "writing archive"),
        }
    }
}

/// Callback trait for build progress updates
pub trait ProgressCallback: Send {
    /// Called when a build step starts
    fn on_step(&mut self, step: &PackageStep);

    /// Called when the archive is complete
    fn on_complete(&mut self, artifact: &Artifact);
}

/// A no-op progress callback for when progress isn't needed
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_step(&mut self, _step: &PackageStep) {}
    fn on_complete(&mut self, _artifact: &Artifact) {}
}

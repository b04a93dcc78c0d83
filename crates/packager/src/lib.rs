//! # packager
//!
//! Builds deployable zip artifacts.
//!
//! A build runs a fixed sequence of steps inside a scoped [`Workspace`]:
//!
//! 1. Fetch the source tree (repository clone or directory copy)
//! 2. Merge installed runtime libraries into the bundle root
//! 3. Remove ignored paths
//! 4. Copy matching shared libraries into `lib/` and rebuild native packages
//! 5. Copy extra files into the bundle root by base name
//! 6. Archive the bundle with DEFLATE and relative entry names
//!
//! ## Example
//!
//! ```no_run
//! use packager::{ArtifactPackager, NoProgress, PackageRequest, SourceRef};
//! use std::path::Path;
//!
//! let packager = ArtifactPackager::new(Path::new("/tmp"));
//! let request = PackageRequest::from_source(SourceRef::parse("./service"));
//! let artifact = packager.build(&request, &mut NoProgress)?;
//! println!("{} bytes, checksum {}", artifact.len(), artifact.checksum());
//! # Ok::<(), packager::Error>(())
//! ```

pub mod error;
pub mod resolver;
pub mod source;
pub mod types;
pub mod workspace;

pub use error::{Error, Result};
pub use resolver::{DependencyResolver, PipRebuilder, Rebuilder};
pub use types::{
    Artifact, NativeDependency, NoProgress, PackageRequest, PackageStep, ProgressCallback,
    SourceRef,
};
pub use workspace::Workspace;

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Builds artifacts in workspaces under a fixed parent directory.
pub struct ArtifactPackager {
    workspace_parent: PathBuf,
    lib_dirs: Vec<PathBuf>,
    rebuilder: Box<dyn Rebuilder>,
}

impl ArtifactPackager {
    /// Create a packager using the default library directories and pip.
    pub fn new(workspace_parent: &Path) -> Self {
        Self {
            workspace_parent: workspace_parent.to_path_buf(),
            lib_dirs: resolver::default_lib_dirs(),
            rebuilder: Box::new(PipRebuilder::default()),
        }
    }

    /// Replace the native package rebuilder.
    pub fn with_rebuilder(mut self, rebuilder: Box<dyn Rebuilder>) -> Self {
        self.rebuilder = rebuilder;
        self
    }

    /// Replace the shared library search directories.
    pub fn with_lib_dirs(mut self, lib_dirs: Vec<PathBuf>) -> Self {
        self.lib_dirs = lib_dirs;
        self
    }

    /// Build an artifact for `request`.
    ///
    /// Any step failing aborts the build; the workspace is removed either way.
    pub fn build<P: ProgressCallback>(
        &self,
        request: &PackageRequest,
        progress: &mut P,
    ) -> Result<Artifact> {
        fs::create_dir_all(&self.workspace_parent)?;
        let workspace = Workspace::create(&self.workspace_parent, &request.workspace_prefix())?;
        let bundle = workspace.bundle_dir();

        progress.on_step(&PackageStep::Source);
        let files = source::materialize(&request.source, &bundle)?;
        log::debug!("Fetched {files} files from {}", request.source);

        if let Some(runtime_libs) = &request.runtime_libs {
            progress.on_step(&PackageStep::RuntimeLibraries);
            let merged = source::merge_installed(runtime_libs, &bundle)?;
            log::debug!("Merged {merged} runtime library entries");
        }

        if !request.ignored_paths.is_empty() {
            progress.on_step(&PackageStep::IgnoredPaths);
            remove_ignored(&bundle, &request.ignored_paths)?;
        }

        if !request.native_dependencies.is_empty() {
            let resolver = DependencyResolver::new(&self.lib_dirs, self.rebuilder.as_ref());

            progress.on_step(&PackageStep::SharedLibraries);
            resolver.collect_libraries(&request.native_dependencies, &bundle)?;

            for dependency in &request.native_dependencies {
                progress.on_step(&PackageStep::Rebuild(dependency.package.clone()));
                let staging = workspace.reset_staging()?;
                resolver.rebuild_into(&dependency.package, &staging, &bundle)?;
            }
        }

        if !request.extra_files.is_empty() {
            progress.on_step(&PackageStep::ExtraFiles);
            copy_extra_files(&bundle, &request.extra_files)?;
        }

        progress.on_step(&PackageStep::Archive);
        let artifact = Artifact::from_bytes(archive(&bundle)?);
        log::info!(
            "Built artifact for {} ({} bytes)",
            request.source,
            artifact.len()
        );

        progress.on_complete(&artifact);
        Ok(artifact)
    }
}

fn remove_ignored(bundle: &Path, ignored: &[String]) -> Result<()> {
    for relative in ignored {
        let path = source::contained_path(bundle, relative)?;
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else if path.exists() {
            fs::remove_file(&path)?;
        } else {
            log::trace!("Ignored path {relative} not present");
        }
    }
    Ok(())
}

fn copy_extra_files(bundle: &Path, files: &[PathBuf]) -> Result<()> {
    for file in files {
        if !file.is_file() {
            return Err(Error::PathNotFound(file.clone()));
        }
        let name = file
            .file_name()
            .ok_or_else(|| Error::InvalidPath(file.display().to_string()))?;
        fs::copy(file, bundle.join(name)).map_err(|source| Error::CopyFailed {
            path: file.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Zip every file under `root` with names relative to it.
///
/// Symlinks are followed and stored as the content they point at.
fn archive(root: &Path) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(file_mode(&entry.metadata()?));

        zip.start_file(name, options)?;
        zip.write_all(&fs::read(path)?)?;
    }

    Ok(zip.finish()?.into_inner())
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    struct RecordingProgress(Vec<PackageStep>);

    impl ProgressCallback for RecordingProgress {
        fn on_step(&mut self, step: &PackageStep) {
            self.0.push(step.clone());
        }
        fn on_complete(&mut self, _artifact: &Artifact) {}
    }

    struct FakeRebuilder(Mutex<Vec<String>>);

    impl Rebuilder for FakeRebuilder {
        fn rebuild(&self, package: &str, target: &Path) -> Result<()> {
            self.0.lock().unwrap().push(package.to_string());
            write(&target.join(package).join("__init__.py"), package);
            Ok(())
        }
    }

    fn source_tree() -> TempDir {
        let src = TempDir::new().unwrap();
        write(&src.path().join("handler.py"), "def handler(e, c): pass");
        write(&src.path().join("tests/test_handler.py"), "assert True");
        write(&src.path().join(".git/config"), "[core]");
        src
    }

    #[test]
    fn test_build_source_only() {
        let src = source_tree();
        let ws = TempDir::new().unwrap();
        let packager = ArtifactPackager::new(ws.path()).with_lib_dirs(Vec::new());

        let request = PackageRequest::from_source(SourceRef::Directory(src.path().into()));
        let artifact = packager.build(&request, &mut NoProgress).unwrap();

        let entries = artifact.entries().unwrap();
        let names: Vec<_> = entries.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["handler.py", "tests/test_handler.py"]);
    }

    #[test]
    fn test_build_full_sequence() {
        let src = source_tree();
        let runtime = TempDir::new().unwrap();
        let libs = TempDir::new().unwrap();
        let extra = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();

        write(&runtime.path().join("requests/__init__.py"), "");
        write(&runtime.path().join("requests-2.31.dist-info/RECORD"), "");
        write(&libs.path().join("libpq.so.5"), "so");
        write(&extra.path().join("conf/settings.json"), "{}");

        let packager = ArtifactPackager::new(ws.path())
            .with_lib_dirs(vec![libs.path().to_path_buf()])
            .with_rebuilder(Box::new(FakeRebuilder(Mutex::new(Vec::new()))));

        let request = PackageRequest {
            source: SourceRef::Directory(src.path().into()),
            runtime_libs: Some(runtime.path().into()),
            ignored_paths: vec!["tests".into()],
            extra_files: vec![extra.path().join("conf/settings.json")],
            native_dependencies: vec![NativeDependency {
                package: "psycopg2".into(),
                library_fragments: vec!["libpq".into()],
            }],
        };

        let mut progress = RecordingProgress(Vec::new());
        let artifact = packager.build(&request, &mut progress).unwrap();
        let entries = artifact.entries().unwrap();

        assert!(entries.contains_key("handler.py"));
        assert!(entries.contains_key("requests/__init__.py"));
        assert!(entries.contains_key("lib/libpq.so.5"));
        assert!(entries.contains_key("psycopg2/__init__.py"));
        assert!(entries.contains_key("settings.json"));
        assert!(!entries.keys().any(|k| k.starts_with("tests/")));
        assert!(!entries.keys().any(|k| k.contains("dist-info")));

        assert_eq!(
            progress.0,
            vec![
                PackageStep::Source,
                PackageStep::RuntimeLibraries,
                PackageStep::IgnoredPaths,
                PackageStep::SharedLibraries,
                PackageStep::Rebuild("psycopg2".into()),
                PackageStep::ExtraFiles,
                PackageStep::Archive,
            ]
        );
    }

    #[test]
    fn test_build_is_reproducible() {
        let src = source_tree();
        let extra = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        write(&extra.path().join("settings.json"), "{}");
        write(&extra.path().join("VERSION"), "1.2.3");

        let packager = ArtifactPackager::new(ws.path()).with_lib_dirs(Vec::new());
        let mut request = PackageRequest::from_source(SourceRef::Directory(src.path().into()));
        request.ignored_paths = vec!["tests".into()];
        request.extra_files = vec![
            extra.path().join("settings.json"),
            extra.path().join("VERSION"),
        ];

        let first = packager.build(&request, &mut NoProgress).unwrap();
        let second = packager.build(&request, &mut NoProgress).unwrap();

        let entries = first.entries().unwrap();
        let names: Vec<_> = entries.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["VERSION", "handler.py", "settings.json"]);
        assert_eq!(entries, second.entries().unwrap());
        assert_eq!(
            first.content_digest().unwrap(),
            second.content_digest().unwrap()
        );
    }

    #[test]
    fn test_concurrent_builds_of_same_source() {
        let src = TempDir::new().unwrap();
        for i in 0..200 {
            write(&src.path().join(format!("pkg{}/mod{i}.py", i % 10)), "x = 1");
        }
        let ws = TempDir::new().unwrap();
        let packager = ArtifactPackager::new(ws.path()).with_lib_dirs(Vec::new());
        let request = PackageRequest::from_source(SourceRef::Directory(src.path().into()));
        let expected = packager.build(&request, &mut NoProgress).unwrap().entries().unwrap();
        assert_eq!(expected.len(), 200);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        (0..4)
                            .map(|_| packager.build(&request, &mut NoProgress))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            for handle in handles {
                for result in handle.join().unwrap() {
                    assert_eq!(result.unwrap().entries().unwrap(), expected);
                }
            }
        });

        assert_eq!(fs::read_dir(ws.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_build_follows_symlinks() {
        let src = TempDir::new().unwrap();
        write(&src.path().join("real.py"), "VALUE = 1");
        let ws = TempDir::new().unwrap();
        let packager = ArtifactPackager::new(ws.path()).with_lib_dirs(Vec::new());
        let runtime = TempDir::new().unwrap();
        write(&runtime.path().join("vendored/real.py"), "VALUE = 2");
        std::os::unix::fs::symlink(
            runtime.path().join("vendored/real.py"),
            runtime.path().join("alias.py"),
        )
        .unwrap();

        let mut request = PackageRequest::from_source(SourceRef::Directory(src.path().into()));
        request.runtime_libs = Some(runtime.path().into());
        let artifact = packager.build(&request, &mut NoProgress).unwrap();

        let entries = artifact.entries().unwrap();
        assert!(entries.contains_key("real.py"));
        assert!(entries.contains_key("vendored/real.py"));
        assert!(entries.contains_key("alias.py"));
        assert_eq!(entries["alias.py"], entries["vendored/real.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_keeps_symlinked_files() {
        let root = TempDir::new().unwrap();
        write(&root.path().join("real.py"), "VALUE = 1");
        std::os::unix::fs::symlink(root.path().join("real.py"), root.path().join("alias.py"))
            .unwrap();

        let artifact = Artifact::from_bytes(archive(root.path()).unwrap());
        let entries = artifact.entries().unwrap();
        let names: Vec<_> = entries.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["alias.py", "real.py"]);
    }

    #[test]
    fn test_build_cleans_workspace() {
        let src = source_tree();
        let ws = TempDir::new().unwrap();
        let packager = ArtifactPackager::new(ws.path()).with_lib_dirs(Vec::new());
        let request = PackageRequest::from_source(SourceRef::Directory(src.path().into()));

        packager.build(&request, &mut NoProgress).unwrap();

        assert_eq!(fs::read_dir(ws.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_extra_file_aborts() {
        let src = source_tree();
        let ws = TempDir::new().unwrap();
        let packager = ArtifactPackager::new(ws.path()).with_lib_dirs(Vec::new());
        let mut request = PackageRequest::from_source(SourceRef::Directory(src.path().into()));
        request.extra_files = vec!["/nonexistent/settings.json".into()];

        let result = packager.build(&request, &mut NoProgress);
        assert!(matches!(result, Err(Error::PathNotFound(_))));
        assert_eq!(fs::read_dir(ws.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_ignored_path_escaping_bundle_is_rejected() {
        let src = source_tree();
        let ws = TempDir::new().unwrap();
        let packager = ArtifactPackager::new(ws.path()).with_lib_dirs(Vec::new());
        let mut request = PackageRequest::from_source(SourceRef::Directory(src.path().into()));
        request.ignored_paths = vec!["../outside".into()];

        let result = packager.build(&request, &mut NoProgress);
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }
}

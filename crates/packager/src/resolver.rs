//! Native dependency resolution.
//!
//! Packages with compiled extensions need the system shared libraries they
//! link against shipped next to them, and must be rebuilt so their runtime
//! search path points at the bundled copies.

use crate::error::{Error, Result};
use crate::source::merge_installed;
use crate::types::NativeDependency;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Directories searched for shared libraries, in order
pub const LIB_DIRS: &[&str] = &[
    "/lib/",
    "/lib64/",
    "/usr/lib/",
    "/usr/lib64/",
    "/usr/lib/x86_64-linux-gnu/",
    "/lib/x86_64-linux-gnu/",
];

/// Runtime library path baked into rebuilt packages
pub const RUNTIME_LIB_RPATH: &str = "/var/task/lib";

/// Directory inside the bundle that receives shared libraries
pub const BUNDLE_LIB_DIR: &str = "lib";

/// Default search directories as owned paths.
pub fn default_lib_dirs() -> Vec<PathBuf> {
    LIB_DIRS.iter().map(PathBuf::from).collect()
}

/// Find shared libraries whose path contains any fragment of any dependency.
///
/// Directories are scanned in order and missing ones are skipped. Matching
/// is plain substring containment against the full candidate path, and a
/// candidate matching several fragments is reported once per fragment.
pub fn find_shared_libraries(
    dependencies: &[NativeDependency],
    lib_dirs: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let fragments: Vec<&str> = dependencies
        .iter()
        .flat_map(|d| d.library_fragments.iter().map(String::as_str))
        .collect();

    let mut found = Vec::new();
    if fragments.is_empty() {
        return Ok(found);
    }

    for dir in lib_dirs {
        if !dir.is_dir() {
            log::trace!("Skipping missing library directory {}", dir.display());
            continue;
        }

        for entry in fs::read_dir(dir)? {
            let candidate = entry?.path();
            let candidate_str = candidate.to_string_lossy();
            for fragment in &fragments {
                if candidate_str.contains(fragment) {
                    found.push(candidate.clone());
                }
            }
        }
    }

    log::debug!("Found {} shared libraries", found.len());
    Ok(found)
}

/// Rebuilds a package so it links against the bundled library directory.
pub trait Rebuilder: Send + Sync {
    /// Install `package` into `target`, built with the bundled runtime path.
    fn rebuild(&self, package: &str, target: &Path) -> Result<()>;
}

/// Rebuilds packages with pip, passing the runtime path to the extension build.
#[derive(Debug, Clone)]
pub struct PipRebuilder {
    pip: String,
    rpath: String,
}

impl Default for PipRebuilder {
    fn default() -> Self {
        Self {
            pip: "pip".to_string(),
            rpath: RUNTIME_LIB_RPATH.to_string(),
        }
    }
}

impl PipRebuilder {
    fn args(&self, package: &str, target: &Path) -> Vec<String> {
        vec![
            "install".to_string(),
            "--upgrade".to_string(),
            "--force-reinstall".to_string(),
            "--no-binary".to_string(),
            package.to_string(),
            "--target".to_string(),
            target.to_string_lossy().to_string(),
            "--global-option=build_ext".to_string(),
            format!("--global-option=--rpath={}", self.rpath),
            package.to_string(),
        ]
    }
}

impl Rebuilder for PipRebuilder {
    fn rebuild(&self, package: &str, target: &Path) -> Result<()> {
        let args = self.args(package, target);
        log::debug!("Running {} {}", self.pip, args.join(" "));

        let output = Command::new(&self.pip)
            .args(&args)
            .output()
            .map_err(|e| Error::RebuildFailed {
                package: package.to_string(),
                message: format!("failed to execute {}: {e}", self.pip),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::RebuildFailed {
                package: package.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Locates shared libraries and rebuilds native packages into a bundle.
pub struct DependencyResolver<'a> {
    lib_dirs: &'a [PathBuf],
    rebuilder: &'a dyn Rebuilder,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(lib_dirs: &'a [PathBuf], rebuilder: &'a dyn Rebuilder) -> Self {
        Self {
            lib_dirs,
            rebuilder,
        }
    }

    /// Copy matching shared libraries into `bundle/lib`.
    pub fn collect_libraries(
        &self,
        dependencies: &[NativeDependency],
        bundle: &Path,
    ) -> Result<Vec<PathBuf>> {
        let libraries = find_shared_libraries(dependencies, self.lib_dirs)?;
        if libraries.is_empty() {
            return Ok(libraries);
        }

        let lib_dir = bundle.join(BUNDLE_LIB_DIR);
        fs::create_dir_all(&lib_dir)?;
        for library in &libraries {
            let Some(name) = library.file_name() else {
                continue;
            };
            fs::copy(library, lib_dir.join(name)).map_err(|source| Error::CopyFailed {
                path: library.clone(),
                source,
            })?;
        }
        Ok(libraries)
    }

    /// Rebuild one package into `staging` and merge the result into `bundle`.
    ///
    /// A failed rebuild aborts packaging.
    pub fn rebuild_into(&self, package: &str, staging: &Path, bundle: &Path) -> Result<()> {
        log::info!("Rebuilding {package} against {RUNTIME_LIB_RPATH}");
        self.rebuilder.rebuild(package, staging)?;
        merge_installed(staging, bundle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn dep(package: &str, fragments: &[&str]) -> NativeDependency {
        NativeDependency {
            package: package.to_string(),
            library_fragments: fragments.iter().map(|s| s.to_string()).collect(),
        }
    }

    struct FakeRebuilder {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Rebuilder for FakeRebuilder {
        fn rebuild(&self, package: &str, target: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(package.to_string());
            if self.fail {
                return Err(Error::RebuildFailed {
                    package: package.to_string(),
                    message: "compiler missing".into(),
                });
            }
            fs::create_dir_all(target.join(package)).unwrap();
            fs::write(target.join(package).join("_native.so"), "elf").unwrap();
            fs::create_dir_all(target.join(format!("{package}-1.0.dist-info"))).unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_find_skips_missing_dirs() {
        let libs = TempDir::new().unwrap();
        fs::write(libs.path().join("libpq.so.5"), "").unwrap();

        let dirs = vec![PathBuf::from("/nonexistent/lib"), libs.path().to_path_buf()];
        let found = find_shared_libraries(&[dep("psycopg2", &["libpq"])], &dirs).unwrap();

        assert_eq!(found, vec![libs.path().join("libpq.so.5")]);
    }

    #[test]
    fn test_find_matches_substrings_without_dedup() {
        let libs = TempDir::new().unwrap();
        fs::write(libs.path().join("libxml2.so.2"), "").unwrap();
        fs::write(libs.path().join("libxslt.so.1"), "").unwrap();
        fs::write(libs.path().join("libc.so.6"), "").unwrap();

        let found = find_shared_libraries(
            &[dep("lxml", &["libxml", "xml2"])],
            &[libs.path().to_path_buf()],
        )
        .unwrap();

        // libxml2 matches both fragments
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.ends_with("libxml2.so.2")));
    }

    #[test]
    fn test_same_library_in_two_dirs() {
        let system = TempDir::new().unwrap();
        let vendor = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        fs::write(system.path().join("libpq.so.5"), "system").unwrap();
        fs::write(vendor.path().join("libpq.so.5"), "vendor").unwrap();

        let dirs = vec![system.path().to_path_buf(), vendor.path().to_path_buf()];
        let deps = [dep("psycopg2", &["libpq"])];
        let found = find_shared_libraries(&deps, &dirs).unwrap();
        assert_eq!(
            found,
            vec![
                system.path().join("libpq.so.5"),
                vendor.path().join("libpq.so.5")
            ]
        );

        // Both are copied in search order, so the later directory wins
        let rebuilder = FakeRebuilder {
            calls: Mutex::new(Vec::new()),
            fail: false,
        };
        let resolver = DependencyResolver::new(&dirs, &rebuilder);
        let copied = resolver.collect_libraries(&deps, ws.path()).unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(
            fs::read_to_string(ws.path().join("lib/libpq.so.5")).unwrap(),
            "vendor"
        );
    }

    #[test]
    fn test_find_no_fragments() {
        let found = find_shared_libraries(&[], &default_lib_dirs()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_collect_and_rebuild() {
        let libs = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        let bundle = ws.path().join("bundle");
        let staging = ws.path().join("staging");
        fs::create_dir_all(&bundle).unwrap();
        fs::create_dir_all(&staging).unwrap();
        fs::write(libs.path().join("libpq.so.5"), "so").unwrap();

        let rebuilder = FakeRebuilder {
            calls: Mutex::new(Vec::new()),
            fail: false,
        };
        let dirs = vec![libs.path().to_path_buf()];
        let resolver = DependencyResolver::new(&dirs, &rebuilder);
        let deps = [dep("psycopg2", &["libpq"])];

        let copied = resolver.collect_libraries(&deps, &bundle).unwrap();
        resolver.rebuild_into("psycopg2", &staging, &bundle).unwrap();

        assert_eq!(copied.len(), 1);
        assert!(bundle.join("lib/libpq.so.5").exists());
        assert!(bundle.join("psycopg2/_native.so").exists());
        assert!(!bundle.join("psycopg2-1.0.dist-info").exists());
        assert_eq!(*rebuilder.calls.lock().unwrap(), vec!["psycopg2"]);
    }

    #[test]
    fn test_rebuild_failure_propagates() {
        let ws = TempDir::new().unwrap();
        let rebuilder = FakeRebuilder {
            calls: Mutex::new(Vec::new()),
            fail: true,
        };
        let dirs = Vec::new();
        let resolver = DependencyResolver::new(&dirs, &rebuilder);

        let result = resolver.rebuild_into("lxml", ws.path(), ws.path());
        assert!(matches!(result, Err(Error::RebuildFailed { .. })));
    }

    #[test]
    fn test_pip_args_carry_rpath() {
        let args = PipRebuilder::default().args("lxml", Path::new("/tmp/staging"));
        assert!(args.contains(&"--global-option=build_ext".to_string()));
        assert!(args.contains(&"--global-option=--rpath=/var/task/lib".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("lxml"));
    }
}

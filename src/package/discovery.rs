//! Finding packages on disk.
//!
//! Local packages are found through their asset manifests, archive packages
//! through their archive files. Anything that fails to open is logged and
//! skipped so one broken package never hides the others.

use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{LOCAL_PACKAGE_VERSION, PackageDescriptor};
use crate::archive::{PackageArchive, ZipPackageArchive};
use crate::runtime::Runtime;

const ASSET_MANIFEST_SUFFIX: &str = ".staticwebassets.runtime.json";
const ASSET_MANIFEST_PATTERN: &str = "*.staticwebassets.runtime.json";
const ARCHIVE_PATTERNS: &[&str] = &["*.zip", "*.nupkg"];

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn matches_any(patterns: &[&str], name: &str) -> bool {
    patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(name))
            .unwrap_or(false)
    })
}

fn list_dir(runtime: &dyn Runtime, dir: &Path) -> Vec<PathBuf> {
    match runtime.read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {:?}: {:#}", dir, e);
            Vec::new()
        }
    }
}

/// Local build outputs under `dir`, searched recursively.
///
/// Every asset manifest whose sibling module file (`<stem><extension>`)
/// exists yields one descriptor. Each directory is visited once by its
/// canonical path, so symlink cycles end the walk instead of looping.
pub fn find_local_modules(runtime: &dyn Runtime, dir: &Path, extension: &str) -> Vec<PackageDescriptor> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let canonical = runtime
            .canonicalize(&current)
            .unwrap_or_else(|_| current.clone());
        if !visited.insert(canonical) {
            debug!("Already searched {:?}", current);
            continue;
        }

        for path in list_dir(runtime, &current) {
            if runtime.is_dir(&path) {
                pending.push(path);
                continue;
            }
            let Some(name) = file_name(&path) else {
                continue;
            };
            if !matches_any(&[ASSET_MANIFEST_PATTERN], name) {
                continue;
            }
            let Some(stem) = name.strip_suffix(ASSET_MANIFEST_SUFFIX) else {
                continue;
            };

            let module_path = path.with_file_name(format!("{}{}", stem, extension));
            if runtime.is_file(&module_path) {
                debug!("Found local package module {:?}", module_path);
                found.push(PackageDescriptor::Local { module_path });
            } else {
                debug!("Asset manifest {:?} has no module next to it", path);
            }
        }
    }

    found.sort_by(|a, b| a.name().cmp(&b.name()));
    found
}

fn open_archive(runtime: &dyn Runtime, path: &Path) -> Option<Arc<dyn PackageArchive>> {
    match ZipPackageArchive::open(runtime, path) {
        Ok(archive) => Some(Arc::new(archive)),
        Err(e) => {
            warn!("Skipping archive {:?}: {:#}", path, e);
            None
        }
    }
}

/// Archive packages under `dir`.
///
/// An archive directly in `dir` is a package of its own, named by its id.
/// A subdirectory is one package named after the subdirectory; every archive
/// inside it belongs to that package's archive set.
pub fn find_archive_packages(runtime: &dyn Runtime, dir: &Path) -> Vec<PackageDescriptor> {
    let mut found = Vec::new();

    for path in list_dir(runtime, dir) {
        if runtime.is_dir(&path) {
            let Some(name) = file_name(&path) else {
                continue;
            };
            let archives: Vec<_> = list_dir(runtime, &path)
                .iter()
                .filter(|p| file_name(p).is_some_and(|n| matches_any(ARCHIVE_PATTERNS, n)))
                .filter_map(|p| open_archive(runtime, p))
                .collect();
            if !archives.is_empty() {
                found.push(PackageDescriptor::Archive {
                    name: name.to_string(),
                    archives,
                });
            }
        } else if file_name(&path).is_some_and(|n| matches_any(ARCHIVE_PATTERNS, n))
            && let Some(archive) = open_archive(runtime, &path)
        {
            found.push(PackageDescriptor::Archive {
                name: archive.id().to_string(),
                archives: vec![archive],
            });
        }
    }

    found
}

fn descriptor_version(descriptor: &PackageDescriptor) -> Option<&str> {
    match descriptor {
        PackageDescriptor::Local { .. } => Some(LOCAL_PACKAGE_VERSION),
        PackageDescriptor::Archive { name, archives } => archives
            .iter()
            .find(|a| a.id().eq_ignore_ascii_case(name))
            .map(|a| a.version()),
    }
}

/// Finds a package that is not registered yet.
#[cfg_attr(test, mockall::automock)]
pub trait PackageLocator: Send + Sync {
    /// Descriptor for `name`; an empty `version` accepts any version.
    fn locate(&self, name: &str, version: &str) -> Option<PackageDescriptor>;
}

/// Looks for packages in the configured local and archive directories.
pub struct DirectoryLocator {
    runtime: Arc<dyn Runtime>,
    local_dirs: Vec<PathBuf>,
    archive_dirs: Vec<PathBuf>,
    extension: String,
}

impl DirectoryLocator {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        local_dirs: Vec<PathBuf>,
        archive_dirs: Vec<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            local_dirs,
            archive_dirs,
            extension: extension.into(),
        }
    }

    /// Every package the directories currently hold.
    pub fn discover(&self) -> Vec<PackageDescriptor> {
        let runtime = self.runtime.as_ref();
        let local = self
            .local_dirs
            .iter()
            .flat_map(|dir| find_local_modules(runtime, dir, &self.extension));
        let archives = self
            .archive_dirs
            .iter()
            .flat_map(|dir| find_archive_packages(runtime, dir));
        local.chain(archives).collect()
    }
}

impl PackageLocator for DirectoryLocator {
    fn locate(&self, name: &str, version: &str) -> Option<PackageDescriptor> {
        self.discover().into_iter().find(|descriptor| {
            descriptor
                .name()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
                && (version.is_empty() || descriptor_version(descriptor) == Some(version))
        })
    }
}

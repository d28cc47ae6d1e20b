//! Component packages (pilets) and the repository that holds them.
//!
//! A package is either local build output or a set of versioned archives.
//! Each owns one isolated [`LoadContext`] and exposes its metadata and
//! static content through a single lookup regardless of packaging.

mod archive;
mod content;
mod discovery;
mod local;
mod repository;

use anyhow::{Result, anyhow};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::archive::{PackageArchive, read_optional};
use crate::config::HostConfig;
use crate::framework::TargetFramework;
use crate::module::{LinkReport, LoadContext, Module, ModuleSource};
use crate::runtime::Runtime;

pub use archive::ArchiveSource;
pub use content::{ContentPath, ContentStream, SHARED_CONTENT_PREFIX};
#[cfg(test)]
pub use discovery::MockPackageLocator;
pub use discovery::{DirectoryLocator, PackageLocator, find_archive_packages, find_local_modules};
pub use local::{LOCAL_PACKAGE_VERSION, LocalIdentity, LocalSource};
pub use repository::Repository;

/// Prefix marking a component name as a mountable route.
pub const ROUTE_PREFIX: &str = "route:";

/// A component contributed by a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentName {
    /// `route:<path>`, holding the path without the prefix
    Route(String),
    /// Any other component name, i.e. an extension slot identifier
    Extension(String),
}

impl ComponentName {
    pub fn parse(name: &str) -> Self {
        match name.strip_prefix(ROUTE_PREFIX) {
            Some(route) => Self::Route(route.to_string()),
            None => Self::Extension(name.to_string()),
        }
    }
}

/// Snapshot of a package's metadata.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub config: Option<Map<String, Value>>,
    pub components: Vec<String>,
    pub dependencies: Vec<String>,
}

/// How to construct a package.
pub enum PackageDescriptor {
    /// Local build output, identified by its primary module file
    Local { module_path: PathBuf },
    /// A set of archives, one of which has the package name as its id
    Archive {
        name: String,
        archives: Vec<Arc<dyn PackageArchive>>,
    },
}

impl PackageDescriptor {
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Local { module_path } => LocalSource::package_name(module_path),
            Self::Archive { name, .. } => Some(name.clone()),
        }
    }
}

impl std::fmt::Debug for PackageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { module_path } => f
                .debug_struct("Local")
                .field("module_path", module_path)
                .finish(),
            Self::Archive { name, archives } => f
                .debug_struct("Archive")
                .field("name", name)
                .field(
                    "archives",
                    &archives.iter().map(|a| a.id()).collect::<Vec<_>>(),
                )
                .finish(),
        }
    }
}

/// Physical packaging of a package.
pub enum PackageSource {
    Local(LocalSource),
    Archive(ArchiveSource),
}

impl PackageSource {
    pub fn get_file(&self, path: &ContentPath<'_>) -> Option<ContentStream> {
        match self {
            Self::Local(source) => source.get_file(path),
            Self::Archive(source) => source.get_file(path),
        }
    }
}

impl ModuleSource for PackageSource {
    fn entry_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Local(source) => source.entry_bytes(),
            Self::Archive(source) => source.entry_bytes(),
        }
    }

    fn locate(&self, file_name: &str) -> Option<Vec<u8>> {
        match self {
            Self::Local(source) => source.locate(file_name),
            Self::Archive(source) => source.locate(file_name),
        }
    }
}

/// First compatible library item named `file_name` across `archives`.
///
/// Unreadable candidates count as misses and the search moves on.
pub(crate) fn locate_in_archives<'a>(
    archives: impl IntoIterator<Item = &'a Arc<dyn PackageArchive>>,
    host: &TargetFramework,
    file_name: &str,
) -> Option<Vec<u8>> {
    let suffix = format!("/{}", file_name);
    archives.into_iter().find_map(|archive| {
        let item = archive.profile().resolve(host, &suffix)?;
        debug!("Taking {} from {} as the most compatible", item, archive.id());
        read_optional(archive.as_ref(), item)
    })
}

/// A registered component package.
pub struct Package {
    name: String,
    version: String,
    config: Option<Map<String, Value>>,
    source: Arc<PackageSource>,
    context: LoadContext,
    disabled: AtomicBool,
}

impl Package {
    /// Construct a package from its descriptor.
    ///
    /// Fails when a required manifest is missing or malformed; nothing is
    /// loaded into the context yet.
    pub fn from_descriptor(
        runtime: Arc<dyn Runtime>,
        config: &HostConfig,
        descriptor: PackageDescriptor,
    ) -> Result<Self> {
        match descriptor {
            PackageDescriptor::Local { module_path } => {
                let (identity, source) = LocalSource::load(runtime, &module_path, config)?;
                Ok(Self::new(
                    identity.name,
                    identity.version,
                    identity.config,
                    PackageSource::Local(source),
                    config,
                ))
            }
            PackageDescriptor::Archive { name, archives } => {
                let source = ArchiveSource::new(
                    &name,
                    archives,
                    config.target_framework.clone(),
                    &config.module_extension,
                );
                let version = source
                    .version()
                    .map(String::from)
                    .ok_or_else(|| anyhow!("Package {} has no archive with its own id", name))?;
                Ok(Self::new(
                    name,
                    version,
                    None,
                    PackageSource::Archive(source),
                    config,
                ))
            }
        }
    }

    fn new(
        name: String,
        version: String,
        package_config: Option<Map<String, Value>>,
        source: PackageSource,
        config: &HostConfig,
    ) -> Self {
        let source = Arc::new(source);
        let context = LoadContext::new(
            &name,
            &config.module_extension,
            source.clone(),
        );
        Self {
            name,
            version,
            config: package_config,
            source,
            context,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> Option<&Map<String, Value>> {
        self.config.as_ref()
    }

    pub fn source(&self) -> &PackageSource {
        &self.source
    }

    pub fn context(&self) -> &LoadContext {
        &self.context
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Toggle visibility; the loading context is left untouched.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// The entry module, loaded on first access.
    pub fn load_entry(&self) -> Result<Arc<Module>> {
        self.context.load_entry()
    }

    /// Load the entry module and everything it references.
    pub fn link(&self) -> Result<LinkReport> {
        let (_, report) = self.context.load_and_link()?;
        if !report.is_complete() {
            warn!(
                "Package {} has unresolved references: {}",
                self.name,
                report.unresolved.join(", ")
            );
        }
        Ok(report)
    }

    /// Resolve a module by name within this package only.
    pub fn resolve_module(&self, name: &str) -> Option<Arc<Module>> {
        self.context.resolve(name)
    }

    fn entry_header_list(&self, select: fn(&Module) -> &Vec<String>) -> Vec<String> {
        match self.load_entry() {
            Ok(entry) => select(&entry).clone(),
            Err(e) => {
                if !self.context.is_disposed() {
                    warn!("Failed to load entry module of {}: {:#}", self.name, e);
                }
                Vec::new()
            }
        }
    }

    /// Raw component names declared by the entry module.
    pub fn component_names(&self) -> Vec<String> {
        self.entry_header_list(|m| &m.header().components)
    }

    pub fn components(&self) -> Vec<ComponentName> {
        self.component_names()
            .iter()
            .map(|n| ComponentName::parse(n))
            .collect()
    }

    /// Shared dependency identifiers declared by the entry module.
    pub fn dependencies(&self) -> Vec<String> {
        self.entry_header_list(|m| &m.header().dependencies)
    }

    pub fn metadata(&self) -> PackageMetadata {
        PackageMetadata {
            name: self.name.clone(),
            version: self.version.clone(),
            config: self.config.clone(),
            components: self.component_names(),
            dependencies: self.dependencies(),
        }
    }

    /// Resolve a logical asset path. A removed package serves nothing.
    pub fn get_file(&self, path: &str) -> Option<ContentStream> {
        if self.context.is_disposed() {
            return None;
        }
        let content_path = ContentPath::parse(path)?;
        self.source.get_file(&content_path)
    }

    /// File name of the package's scoped stylesheet.
    pub fn stylesheet(&self) -> String {
        match self.source.as_ref() {
            PackageSource::Local(_) => format!("{}.styles.css", self.name),
            PackageSource::Archive(_) => format!("{}.bundle.scp.css", self.name),
        }
    }

    /// Release the loading context. Only the repository calls this.
    pub(crate) fn teardown(&self) -> bool {
        self.context.dispose()
    }
}

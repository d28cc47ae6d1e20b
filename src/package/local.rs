//! Packages backed by local build output.
//!
//! A local package is discovered from its primary module file. Sibling files
//! next to it describe everything else:
//!
//! - `config.json` - optional configuration object
//! - `<stem>.staticwebassets.runtime.json` - content root directories
//! - `<stem>.deps.json` - referenced libraries, resolved to archives in the
//!   local archive cache

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::content::{ContentPath, ContentStream};
use super::locate_in_archives;
use crate::archive::{PackageArchive, ZipPackageArchive, read_optional, static_asset_entry};
use crate::config::HostConfig;
use crate::framework::TargetFramework;
use crate::module::ModuleSource;
use crate::runtime::Runtime;

pub const LOCAL_PACKAGE_VERSION: &str = "0.0.0";
const CONFIG_FILE: &str = "config.json";
const ASSET_MANIFEST_EXTENSION: &str = "staticwebassets.runtime.json";
const DEPS_MANIFEST_EXTENSION: &str = "deps.json";
const CACHED_ARCHIVE_EXTENSION: &str = "nupkg";

#[derive(Deserialize, Debug, Default)]
struct StaticWebAssets {
    #[serde(rename = "ContentRoots")]
    content_roots: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct DependenciesList {
    libraries: Option<IndexMap<String, DependencyDescription>>,
}

#[derive(Deserialize, Debug)]
struct DependencyDescription {
    #[serde(rename = "type")]
    kind: Option<String>,
    path: Option<String>,
}

/// Name, version and configuration read from local build output.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    pub name: String,
    pub version: String,
    pub config: Option<Map<String, Value>>,
}

pub struct LocalSource {
    runtime: Arc<dyn Runtime>,
    module_path: PathBuf,
    content_roots: Vec<PathBuf>,
    archives: Vec<Arc<dyn PackageArchive>>,
    host: TargetFramework,
}

impl LocalSource {
    /// Package name for a module path (its file stem).
    pub fn package_name(module_path: &Path) -> Option<String> {
        module_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
    }

    /// Read the sibling manifests of `module_path`.
    ///
    /// A malformed configuration, asset or dependency manifest fails the
    /// whole package.
    #[tracing::instrument(skip(runtime, config))]
    pub fn load(
        runtime: Arc<dyn Runtime>,
        module_path: &Path,
        config: &HostConfig,
    ) -> Result<(LocalIdentity, Self)> {
        let name = Self::package_name(module_path)
            .ok_or_else(|| anyhow!("Invalid module path {:?}", module_path))?;

        let identity = LocalIdentity {
            name,
            version: LOCAL_PACKAGE_VERSION.to_string(),
            config: Self::read_config(runtime.as_ref(), module_path)?,
        };
        let content_roots = Self::read_content_roots(runtime.as_ref(), module_path)?;
        let archives = Self::read_dependencies(runtime.as_ref(), module_path, &config.archive_cache)?;

        debug!(
            "Local package {} has {} content root(s) and {} dependency archive(s)",
            identity.name,
            content_roots.len(),
            archives.len()
        );

        let source = Self {
            runtime,
            module_path: module_path.to_path_buf(),
            content_roots,
            archives,
            host: config.target_framework.clone(),
        };
        Ok((identity, source))
    }

    fn read_config(runtime: &dyn Runtime, module_path: &Path) -> Result<Option<Map<String, Value>>> {
        let Some(dir) = module_path.parent() else {
            return Ok(None);
        };
        let config_path = dir.join(CONFIG_FILE);
        if !runtime.exists(&config_path) {
            return Ok(None);
        }

        let text = runtime.read_to_string(&config_path)?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Malformed configuration {:?}", config_path))?;
        Ok(Some(config))
    }

    fn read_content_roots(runtime: &dyn Runtime, module_path: &Path) -> Result<Vec<PathBuf>> {
        let manifest_path = module_path.with_extension(ASSET_MANIFEST_EXTENSION);
        let text = runtime.read_to_string(&manifest_path)?;
        let assets: StaticWebAssets = serde_json::from_str(&text)
            .with_context(|| format!("Malformed asset manifest {:?}", manifest_path))?;

        Ok(assets
            .content_roots
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    fn read_dependencies(
        runtime: &dyn Runtime,
        module_path: &Path,
        archive_cache: &Path,
    ) -> Result<Vec<Arc<dyn PackageArchive>>> {
        let manifest_path = module_path.with_extension(DEPS_MANIFEST_EXTENSION);
        let text = runtime.read_to_string(&manifest_path)?;
        let deps: DependenciesList = serde_json::from_str(&text)
            .with_context(|| format!("Malformed dependency manifest {:?}", manifest_path))?;

        let mut archives: Vec<Arc<dyn PackageArchive>> = Vec::new();
        for (key, lib) in deps.libraries.unwrap_or_default() {
            if lib.kind.as_deref() != Some("package") {
                continue;
            }
            let Some(lib_path) = lib.path else {
                continue;
            };

            let archive_path = Self::cached_archive_path(archive_cache, &key, &lib_path);
            let (id, version) = key.split_once('/').unwrap_or((key.as_str(), ""));
            match ZipPackageArchive::open_with_identity(runtime, &archive_path, id, version) {
                Ok(archive) => archives.push(Arc::new(archive)),
                Err(e) => warn!("Skipping dependency {}: {:#}", key, e),
            }
        }
        Ok(archives)
    }

    /// `<cache>/<path>/<lowercased key with '/' replaced by '.'>.nupkg`
    fn cached_archive_path(archive_cache: &Path, key: &str, lib_path: &str) -> PathBuf {
        let file_stem = key.to_lowercase().replace('/', ".");
        archive_cache
            .join(lib_path)
            .join(format!("{}.{}", file_stem, CACHED_ARCHIVE_EXTENSION))
    }

    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    pub fn content_roots(&self) -> &[PathBuf] {
        &self.content_roots
    }

    pub fn archives(&self) -> &[Arc<dyn PackageArchive>] {
        &self.archives
    }

    fn open_under(&self, root: &Path, relative: &str) -> Option<ContentStream> {
        let relative = Path::new(relative);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            debug!("Refusing content path {:?} outside {:?}", relative, root);
            return None;
        }
        let full_path = root.join(relative);
        if !self.runtime.is_file(&full_path) {
            return None;
        }
        match self.runtime.open(&full_path) {
            Ok(stream) => Some(stream),
            Err(e) => {
                debug!("Failed to open {:?}: {:#}", full_path, e);
                None
            }
        }
    }

    pub fn get_file(&self, path: &ContentPath<'_>) -> Option<ContentStream> {
        match path {
            ContentPath::Shared { package, rest } => {
                let needle = package.to_lowercase();
                let from_roots = self
                    .content_roots
                    .iter()
                    .filter(|root| root.to_string_lossy().to_lowercase().contains(&needle))
                    .find_map(|root| self.open_under(root, rest));
                if from_roots.is_some() {
                    return from_roots;
                }

                self.archives
                    .iter()
                    .filter(|a| a.id().eq_ignore_ascii_case(package))
                    .find_map(|a| read_optional(a.as_ref(), &static_asset_entry(rest)))
                    .map(|bytes| Box::new(Cursor::new(bytes)) as ContentStream)
            }
            ContentPath::Own(relative) => self
                .content_roots
                .iter()
                .find_map(|root| self.open_under(root, relative)),
        }
    }
}

impl ModuleSource for LocalSource {
    fn entry_bytes(&self) -> Result<Vec<u8>> {
        self.runtime.read(&self.module_path)
    }

    fn locate(&self, file_name: &str) -> Option<Vec<u8>> {
        locate_in_archives(self.archives.iter(), &self.host, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MockPackageArchive;
    use crate::config::AppIdentity;
    use crate::framework::{CompatibilityProfile, FrameworkGroup};
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::test_utils::build_zip;
    use mockall::predicate::eq;
    use std::fs;
    use std::io::Read;
    use tempfile::tempdir;

    fn host_config(cache: &Path) -> HostConfig {
        HostConfig::new(AppIdentity::default(), TargetFramework::parse("net8.0"), cache)
    }

    fn read_all(mut stream: ContentStream) -> Vec<u8> {
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).unwrap();
        buffer
    }

    /// Lay out `bin/PkgA.dll` with its sibling manifests under `dir`.
    fn write_build_output(dir: &Path, content_roots: &[&Path], deps: &str) -> PathBuf {
        let bin = dir.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let module_path = bin.join("PkgA.dll");
        fs::write(&module_path, br#"{"components":["route:/home"]}"#).unwrap();

        let roots: Vec<String> = content_roots
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        fs::write(
            bin.join("PkgA.staticwebassets.runtime.json"),
            serde_json::json!({ "ContentRoots": roots, "Root": {} }).to_string(),
        )
        .unwrap();
        fs::write(bin.join("PkgA.deps.json"), deps).unwrap();
        module_path
    }

    #[test]
    fn test_package_name_is_file_stem() {
        assert_eq!(
            LocalSource::package_name(Path::new("/out/PkgA.dll")),
            Some("PkgA".to_string())
        );
    }

    #[test]
    fn test_cached_archive_path() {
        assert_eq!(
            LocalSource::cached_archive_path(
                Path::new("/home/user/.nuget/packages"),
                "Shared.Ui/1.0.0",
                "shared.ui/1.0.0"
            ),
            PathBuf::from("/home/user/.nuget/packages/shared.ui/1.0.0/shared.ui.1.0.0.nupkg")
        );
    }

    #[test]
    fn test_load_reads_sibling_manifests() {
        let dir = tempdir().unwrap();
        let wwwroot = dir.path().join("PkgA").join("wwwroot");
        fs::create_dir_all(&wwwroot).unwrap();
        let module_path = write_build_output(
            dir.path(),
            &[&wwwroot],
            r#"{"libraries":{"PkgA/1.0.0":{"type":"project"}}}"#,
        );
        fs::write(module_path.with_file_name("config.json"), r#"{"apiUrl":"/api"}"#).unwrap();

        let (identity, source) =
            LocalSource::load(Arc::new(RealRuntime), &module_path, &host_config(dir.path())).unwrap();

        assert_eq!(identity.name, "PkgA");
        assert_eq!(identity.version, "0.0.0");
        assert_eq!(
            identity.config.and_then(|c| c.get("apiUrl").cloned()),
            Some(Value::String("/api".into()))
        );
        assert_eq!(source.content_roots(), &[wwwroot]);
        assert!(source.archives().is_empty());
        assert_eq!(
            source.entry_bytes().unwrap(),
            br#"{"components":["route:/home"]}"#.to_vec()
        );
    }

    #[test]
    fn test_load_fails_on_malformed_asset_manifest() {
        let dir = tempdir().unwrap();
        let module_path = write_build_output(dir.path(), &[], r#"{"libraries":{}}"#);
        fs::write(
            module_path.with_extension("staticwebassets.runtime.json"),
            "{ not json",
        )
        .unwrap();

        let result = LocalSource::load(Arc::new(RealRuntime), &module_path, &host_config(dir.path()));
        let message = format!("{:#}", result.err().unwrap());
        assert!(message.contains("Malformed asset manifest"));
    }

    #[test]
    fn test_load_fails_on_missing_dependency_manifest() {
        let dir = tempdir().unwrap();
        let module_path = write_build_output(dir.path(), &[], "{}");
        fs::remove_file(module_path.with_extension("deps.json")).unwrap();

        assert!(
            LocalSource::load(Arc::new(RealRuntime), &module_path, &host_config(dir.path()))
                .is_err()
        );
    }

    #[test]
    fn test_load_fails_on_malformed_config() {
        let dir = tempdir().unwrap();
        let module_path = write_build_output(dir.path(), &[], "{}");
        fs::write(module_path.with_file_name("config.json"), "[1, 2]").unwrap();

        assert!(
            LocalSource::load(Arc::new(RealRuntime), &module_path, &host_config(dir.path()))
                .is_err()
        );
    }

    #[test_log::test]
    fn test_load_attaches_cached_dependency_archives() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("cache");
        let archive_dir = cache.join("shared.ui").join("1.0.0");
        fs::create_dir_all(&archive_dir).unwrap();
        fs::write(
            archive_dir.join("shared.ui.1.0.0.nupkg"),
            build_zip(&[
                ("lib/net6.0/Shared.Ui.dll", b"net6"),
                ("lib/net8.0/Shared.Ui.dll", b"net8"),
                ("staticwebassets/shared.css", b"body{}"),
            ]),
        )
        .unwrap();

        let module_path = write_build_output(
            dir.path(),
            &[],
            r#"{"libraries":{
                "Shared.Ui/1.0.0":{"type":"package","path":"shared.ui/1.0.0"},
                "Missing.Lib/2.0.0":{"type":"package","path":"missing.lib/2.0.0"},
                "PkgA/1.0.0":{"type":"project","path":"pkga"}
            }}"#,
        );

        let (_, source) =
            LocalSource::load(Arc::new(RealRuntime), &module_path, &host_config(&cache)).unwrap();

        assert_eq!(source.archives().len(), 1);
        assert_eq!(source.archives()[0].id(), "Shared.Ui");
        assert_eq!(source.locate("Shared.Ui.dll"), Some(b"net8".to_vec()));
        assert_eq!(source.locate("Other.dll"), None);

        let css = source
            .get_file(&ContentPath::parse("_content/shared.ui/shared.css").unwrap())
            .map(read_all);
        assert_eq!(css, Some(b"body{}".to_vec()));
    }

    #[test]
    fn test_get_file_from_content_roots() {
        let dir = tempdir().unwrap();
        let own_root = dir.path().join("PkgA").join("wwwroot");
        let shared_root = dir.path().join("pkgB").join("wwwroot");
        fs::create_dir_all(&own_root).unwrap();
        fs::create_dir_all(&shared_root).unwrap();
        fs::write(own_root.join("app.css"), "own").unwrap();
        fs::write(shared_root.join("logo.png"), "logo").unwrap();

        let module_path = write_build_output(dir.path(), &[&own_root, &shared_root], "{}");
        let (_, source) =
            LocalSource::load(Arc::new(RealRuntime), &module_path, &host_config(dir.path())).unwrap();

        let own = source.get_file(&ContentPath::parse("app.css").unwrap());
        assert_eq!(own.map(read_all), Some(b"own".to_vec()));

        let shared = source.get_file(&ContentPath::parse("_content/PKGB/logo.png").unwrap());
        assert_eq!(shared.map(read_all), Some(b"logo".to_vec()));

        assert!(
            source
                .get_file(&ContentPath::parse("_content/pkgB/missing.png").unwrap())
                .is_none()
        );
        assert!(
            source
                .get_file(&ContentPath::parse("_content/pkgC/logo.png").unwrap())
                .is_none()
        );
    }

    #[test]
    fn test_get_file_stays_inside_content_roots() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("pkgA").join("wwwroot");
        fs::create_dir_all(&root).unwrap();
        let secret = dir.path().join("secret.txt");
        fs::write(&secret, "TOP-SECRET").unwrap();

        let module_path = write_build_output(dir.path(), &[&root], "{}");
        let (_, source) =
            LocalSource::load(Arc::new(RealRuntime), &module_path, &host_config(dir.path())).unwrap();

        let absolute = format!("_content/pkgA/{}", secret.to_string_lossy());
        assert_eq!(ContentPath::parse(&absolute), None);

        let forged = ContentPath::Shared {
            package: "pkgA",
            rest: secret.to_string_lossy().into_owned(),
        };
        assert!(source.get_file(&forged).is_none());
        assert!(
            source
                .get_file(&ContentPath::Own("../../secret.txt".to_string()))
                .is_none()
        );
    }

    #[test_log::test]
    fn test_locate_skips_corrupted_archive() {
        let profile = CompatibilityProfile::from_groups([FrameworkGroup::new(
            TargetFramework::parse("net8.0"),
            vec!["lib/net8.0/Shared.dll".to_string()],
        )]);

        let mut broken = MockPackageArchive::new();
        broken.expect_profile().return_const(profile.clone());
        broken.expect_id().return_const("broken".to_string());
        broken
            .expect_read_entry()
            .returning(|_| Err(anyhow!("invalid checksum")));

        let mut healthy = MockPackageArchive::new();
        healthy.expect_profile().return_const(profile);
        healthy.expect_id().return_const("healthy".to_string());
        healthy
            .expect_read_entry()
            .with(eq("lib/net8.0/Shared.dll"))
            .returning(|_| Ok(Some(b"shared".to_vec())));

        let source = LocalSource {
            runtime: Arc::new(MockRuntime::new()),
            module_path: PathBuf::from("/out/PkgA.dll"),
            content_roots: vec![],
            archives: vec![Arc::new(broken), Arc::new(healthy)],
            host: TargetFramework::parse("net8.0"),
        };

        assert_eq!(source.locate("Shared.dll"), Some(b"shared".to_vec()));
    }
}

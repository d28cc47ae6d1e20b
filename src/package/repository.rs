use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{ComponentName, Package, PackageDescriptor};
use crate::config::HostConfig;
use crate::runtime::Runtime;

/// Registry of packages by name.
///
/// Mutations are serialized per package name. Packages are constructed
/// before the registry lock is taken, so slow I/O for one package never
/// blocks readers of the others. Replacing or removing a package disposes
/// its loading context while the registry is write-locked, so readers see a
/// package either fully present or fully gone.
pub struct Repository {
    runtime: Arc<dyn Runtime>,
    config: Arc<HostConfig>,
    packages: RwLock<IndexMap<String, Arc<Package>>>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Repository {
    pub fn new(runtime: Arc<dyn Runtime>, config: Arc<HostConfig>) -> Self {
        Self {
            runtime,
            config,
            packages: RwLock::new(IndexMap::new()),
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Run `f` holding the per-name mutation lock for `name`.
    ///
    /// The lock entry is dropped again once nobody else holds it and no
    /// package of that name is registered.
    fn with_name_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.name_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Clones are only taken under `name_locks`, so the count cannot grow here.
        let mut locks = self.name_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 && self.get_package(name).is_none() {
            locks.remove(name);
        }
        result
    }

    pub fn get_package(&self, name: &str) -> Option<Arc<Package>> {
        let packages = self.packages.read().unwrap_or_else(PoisonError::into_inner);
        packages.get(name).cloned()
    }

    /// All packages in registration order.
    pub fn packages(&self) -> Vec<Arc<Package>> {
        let packages = self.packages.read().unwrap_or_else(PoisonError::into_inner);
        packages.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Construct and register a package.
    ///
    /// An existing package with the same name is replaced in place: it keeps
    /// its position, its old loading context is disposed and the new package
    /// starts enabled.
    pub fn add_package(&self, descriptor: PackageDescriptor) -> Result<Arc<Package>> {
        let name = descriptor
            .name()
            .ok_or_else(|| anyhow!("Cannot determine package name of {:?}", descriptor))?;

        self.with_name_lock(&name, || -> Result<Arc<Package>> {
            let package = Arc::new(Package::from_descriptor(
                Arc::clone(&self.runtime),
                &self.config,
                descriptor,
            )?);

            let mut packages = self.packages.write().unwrap_or_else(PoisonError::into_inner);
            match packages.insert(name.clone(), Arc::clone(&package)) {
                Some(previous) => {
                    previous.teardown();
                    info!("Updated package {} to version {}", name, package.version());
                }
                None => info!("Added package {} {}", name, package.version()),
            }
            Ok(package)
        })
    }

    /// Register each descriptor, skipping the ones that fail.
    pub fn load_all(&self, descriptors: impl IntoIterator<Item = PackageDescriptor>) -> usize {
        let mut added = 0;
        for descriptor in descriptors {
            match self.add_package(descriptor) {
                Ok(_) => added += 1,
                Err(e) => warn!("Skipping package: {:#}", e),
            }
        }
        added
    }

    /// Remove a package and dispose its loading context.
    ///
    /// Returns whether a package was removed; absent names are a no-op.
    pub fn delete_package(&self, name: &str) -> bool {
        self.with_name_lock(name, || {
            let mut packages = self.packages.write().unwrap_or_else(PoisonError::into_inner);
            match packages.shift_remove(name) {
                Some(package) => {
                    package.teardown();
                    info!("Removed package {}", name);
                    true
                }
                None => {
                    debug!("Package {} is not registered, nothing to remove", name);
                    false
                }
            }
        })
    }

    /// Toggle a package's visibility. Returns whether the package exists.
    pub fn set_disabled(&self, name: &str, disabled: bool) -> bool {
        self.with_name_lock(name, || match self.get_package(name) {
            Some(package) => {
                package.set_disabled(disabled);
                debug!("Package {} disabled = {}", name, disabled);
                true
            }
            None => false,
        })
    }

    /// Read each package's header through `read`, skipping packages torn
    /// down before the read finished.
    fn live_headers<T>(&self, read: impl Fn(&Package) -> Vec<T>) -> Vec<T> {
        let mut values = Vec::new();
        for package in self.packages() {
            let read_values = read(&package);
            if !package.context().is_disposed() {
                values.extend(read_values);
            }
        }
        values
    }

    fn components(&self) -> Vec<ComponentName> {
        self.live_headers(Package::components)
    }

    /// Route paths of all packages, prefix stripped.
    pub fn routes(&self) -> Vec<String> {
        self.components()
            .into_iter()
            .filter_map(|c| match c {
                ComponentName::Route(route) => Some(route),
                ComponentName::Extension(_) => None,
            })
            .collect()
    }

    /// Extension slot names of all packages.
    pub fn extensions(&self) -> Vec<String> {
        self.components()
            .into_iter()
            .filter_map(|c| match c {
                ComponentName::Extension(name) => Some(name),
                ComponentName::Route(_) => None,
            })
            .collect()
    }

    /// Union of all package dependencies, first-seen order.
    pub fn dependencies(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for dependency in self.live_headers(Package::dependencies) {
            if !seen.contains(&dependency) {
                seen.push(dependency);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{PackageArchive, ZipPackageArchive};
    use crate::config::AppIdentity;
    use crate::framework::TargetFramework;
    use crate::runtime::RealRuntime;
    use crate::test_utils::{build_zip, manifest};
    use std::thread;

    fn repository() -> Repository {
        Repository::new(
            Arc::new(RealRuntime),
            Arc::new(HostConfig::new(
                AppIdentity::default(),
                TargetFramework::parse("net8.0"),
                "/nonexistent/cache",
            )),
        )
    }

    fn descriptor(name: &str, version: &str, header: &str) -> PackageDescriptor {
        let entry = format!("lib/net8.0/{}.dll", name);
        let archive = ZipPackageArchive::from_bytes(build_zip(&[
            ("manifest.json", &manifest(name, version)),
            (&entry, header.as_bytes()),
            ("lib/net8.0/Shared.dll", b"shared"),
            ("staticwebassets/app.css", b"css"),
        ]))
        .unwrap();
        PackageDescriptor::Archive {
            name: name.to_string(),
            archives: vec![Arc::new(archive) as Arc<dyn PackageArchive>],
        }
    }

    fn pkg_a() -> PackageDescriptor {
        descriptor(
            "pkgA",
            "1.0.0",
            r#"{"references":["Shared"],"components":["route:/home","widget:nav"],"dependencies":["shared-ui@1.0"]}"#,
        )
    }

    fn pkg_b() -> PackageDescriptor {
        descriptor(
            "pkgB",
            "2.0.0",
            r#"{"components":["route:/about"],"dependencies":["shared-ui@1.0","charts@3.1"]}"#,
        )
    }

    #[test]
    fn test_added_package_is_enabled() {
        let repo = repository();
        repo.add_package(pkg_a()).unwrap();

        let package = repo.get_package("pkgA").unwrap();
        assert!(!package.is_disabled());
        assert!(repo.get_package("pkgC").is_none());
    }

    #[test]
    fn test_readd_updates_in_place() {
        let repo = repository();
        repo.add_package(pkg_a()).unwrap();
        repo.add_package(pkg_b()).unwrap();
        let old = repo.get_package("pkgA").unwrap();
        old.load_entry().unwrap();
        repo.set_disabled("pkgA", true);

        repo.add_package(descriptor("pkgA", "1.1.0", "{}")).unwrap();

        let names: Vec<String> = repo.packages().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["pkgA", "pkgB"]);

        let current = repo.get_package("pkgA").unwrap();
        assert_eq!(current.version(), "1.1.0");
        assert!(!current.is_disabled());
        assert!(old.context().is_disposed());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let repo = repository();
        repo.add_package(pkg_a()).unwrap();

        assert!(repo.delete_package("pkgA"));
        assert!(!repo.delete_package("pkgA"));
        assert!(repo.get_package("pkgA").is_none());
        assert!(repo.is_empty());
    }

    #[test]
    fn test_delete_tears_down_context() {
        let repo = repository();
        let package = repo.add_package(pkg_a()).unwrap();
        package.link().unwrap();
        assert!(package.resolve_module("Shared").is_some());

        repo.delete_package("pkgA");

        assert!(package.resolve_module("Shared").is_none());
        assert!(package.load_entry().is_err());
        assert!(package.get_file("app.css").is_none());
    }

    #[test]
    fn test_set_disabled_keeps_loaded_modules() {
        let repo = repository();
        let package = repo.add_package(pkg_a()).unwrap();
        let shared = package.resolve_module("Shared").unwrap();

        assert!(repo.set_disabled("pkgA", true));
        assert!(package.is_disabled());
        assert!(Arc::ptr_eq(&shared, &package.resolve_module("Shared").unwrap()));

        assert!(!repo.set_disabled("pkgC", true));
    }

    #[test]
    fn test_aggregated_views() {
        let repo = repository();
        repo.add_package(pkg_a()).unwrap();
        repo.add_package(pkg_b()).unwrap();
        repo.set_disabled("pkgB", true);

        assert_eq!(repo.routes(), vec!["/home", "/about"]);
        assert_eq!(repo.extensions(), vec!["widget:nav"]);
        assert_eq!(repo.dependencies(), vec!["shared-ui@1.0", "charts@3.1"]);
    }

    #[test]
    fn test_views_skip_packages_torn_down_mid_read() {
        let repo = repository();
        repo.add_package(pkg_a()).unwrap();
        repo.add_package(pkg_b()).unwrap();

        let read = repo.live_headers(|package| {
            let components = package.components();
            if package.name() == "pkgA" {
                repo.packages.write().unwrap().shift_remove("pkgA");
                package.teardown();
            }
            components
        });

        assert_eq!(read, vec![ComponentName::Route("/about".to_string())]);
        assert_eq!(repo.routes(), vec!["/about"]);
        assert_eq!(repo.dependencies(), vec!["shared-ui@1.0", "charts@3.1"]);
    }

    #[test]
    fn test_name_locks_are_pruned() {
        let repo = repository();
        repo.add_package(pkg_a()).unwrap();
        repo.delete_package("ghost");
        repo.set_disabled("phantom", true);
        assert!(
            repo.add_package(PackageDescriptor::Archive {
                name: "pkgX".into(),
                archives: vec![],
            })
            .is_err()
        );
        assert_eq!(repo.name_locks.lock().unwrap().len(), 1);

        repo.delete_package("pkgA");
        assert!(repo.name_locks.lock().unwrap().is_empty());
    }

    #[test_log::test]
    fn test_load_all_skips_broken_packages() {
        let repo = repository();
        let broken = PackageDescriptor::Archive {
            name: "pkgX".into(),
            archives: vec![],
        };

        assert_eq!(repo.load_all(vec![pkg_a(), broken, pkg_b()]), 2);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn test_concurrent_add_and_delete_stay_consistent() {
        let repo = Arc::new(repository());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        repo.add_package(pkg_a()).unwrap();
                    } else {
                        repo.delete_package("pkgA");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(repo.len() <= 1);
        if let Some(package) = repo.get_package("pkgA") {
            assert!(!package.context().is_disposed());
        }
    }
}

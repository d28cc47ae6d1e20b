//! Packages shipped as versioned component archives.

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use std::io::Cursor;
use std::sync::Arc;

use super::content::{ContentPath, ContentStream};
use super::locate_in_archives;
use crate::archive::{PackageArchive, read_optional, static_asset_entry};
use crate::framework::TargetFramework;
use crate::module::ModuleSource;

/// The archive set of one archive-sourced package, keyed by archive id.
///
/// The archive whose id equals the package name carries the entry module
/// and the package's own assets; the others are its dependencies.
pub struct ArchiveSource {
    name: String,
    archives: IndexMap<String, Arc<dyn PackageArchive>>,
    host: TargetFramework,
    extension: String,
}

impl ArchiveSource {
    pub fn new(
        name: impl Into<String>,
        archives: impl IntoIterator<Item = Arc<dyn PackageArchive>>,
        host: TargetFramework,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            archives: archives
                .into_iter()
                .map(|a| (a.id().to_string(), a))
                .collect(),
            host,
            extension: extension.into(),
        }
    }

    /// Archive by id, exact match first, then ignoring ASCII case.
    pub fn archive(&self, id: &str) -> Option<&Arc<dyn PackageArchive>> {
        self.archives.get(id).or_else(|| {
            self.archives
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(id))
                .map(|(_, archive)| archive)
        })
    }

    /// The package's own archive.
    pub fn own_archive(&self) -> Option<&Arc<dyn PackageArchive>> {
        self.archive(&self.name)
    }

    /// Version of the package's own archive.
    pub fn version(&self) -> Option<&str> {
        self.own_archive().map(|a| a.version())
    }

    pub fn archive_ids(&self) -> impl Iterator<Item = &str> {
        self.archives.keys().map(String::as_str)
    }

    fn read_asset(archive: &dyn PackageArchive, path: &str) -> Option<ContentStream> {
        read_optional(archive, &static_asset_entry(path))
            .map(|bytes| Box::new(Cursor::new(bytes)) as ContentStream)
    }

    pub fn get_file(&self, path: &ContentPath<'_>) -> Option<ContentStream> {
        match path {
            ContentPath::Shared { package, rest } => {
                Self::read_asset(self.archive(package)?.as_ref(), rest)
            }
            ContentPath::Own(relative) => Self::read_asset(self.own_archive()?.as_ref(), relative),
        }
    }
}

impl ModuleSource for ArchiveSource {
    fn entry_bytes(&self) -> Result<Vec<u8>> {
        let archive = self
            .own_archive()
            .ok_or_else(|| anyhow!("No archive with id {} in package set", self.name))?;

        let file_name = format!("/{}{}", self.name, self.extension);
        let item = archive
            .profile()
            .resolve(&self.host, &file_name)
            .ok_or_else(|| {
                anyhow!(
                    "Archive {} has no {} item compatible with {}",
                    self.name,
                    file_name.trim_start_matches('/'),
                    self.host
                )
            })?;

        archive
            .read_entry(item)?
            .ok_or_else(|| anyhow!("Entry {} missing from archive {}", item, self.name))
    }

    fn locate(&self, file_name: &str) -> Option<Vec<u8>> {
        locate_in_archives(self.archives.values(), &self.host, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{MockPackageArchive, ZipPackageArchive};
    use crate::test_utils::{build_zip, manifest};
    use std::io::Read;

    fn zip_archive(files: &[(&str, &[u8])]) -> Arc<dyn PackageArchive> {
        Arc::new(ZipPackageArchive::from_bytes(build_zip(files)).unwrap())
    }

    fn source(archives: Vec<Arc<dyn PackageArchive>>) -> ArchiveSource {
        ArchiveSource::new("PkgA", archives, TargetFramework::parse("net8.0"), ".dll")
    }

    fn read_all(mut stream: ContentStream) -> Vec<u8> {
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).unwrap();
        buffer
    }

    fn pkg_a() -> Arc<dyn PackageArchive> {
        zip_archive(&[
            ("manifest.json", &manifest("PkgA", "2.1.0")),
            ("lib/netstandard2.0/PkgA.dll", b"std-entry"),
            ("lib/net8.0/PkgA.dll", b"net8-entry"),
            ("staticwebassets/app.css", b"own-css"),
        ])
    }

    fn pkg_b() -> Arc<dyn PackageArchive> {
        zip_archive(&[
            ("manifest.json", &manifest("pkgB", "1.0.0")),
            ("lib/net6.0/Shared.dll", b"shared-net6"),
            ("staticwebassets/logo.png", b"logo"),
        ])
    }

    #[test]
    fn test_entry_bytes_uses_best_fit() {
        let source = source(vec![pkg_a(), pkg_b()]);
        assert_eq!(source.entry_bytes().unwrap(), b"net8-entry".to_vec());
        assert_eq!(source.version(), Some("2.1.0"));
    }

    #[test]
    fn test_entry_bytes_without_own_archive_fails() {
        let source = source(vec![pkg_b()]);
        assert!(source.entry_bytes().is_err());
        assert_eq!(source.version(), None);
    }

    #[test]
    fn test_entry_bytes_does_not_match_name_suffix() {
        let source = ArchiveSource::new(
            "A",
            vec![zip_archive(&[
                ("manifest.json", &manifest("A", "1.0.0")),
                ("lib/net8.0/PkgA.dll", b"wrong"),
            ])],
            TargetFramework::parse("net8.0"),
            ".dll",
        );
        assert!(source.entry_bytes().is_err());
    }

    #[test]
    fn test_locate_searches_all_archives() {
        let source = source(vec![pkg_a(), pkg_b()]);
        assert_eq!(source.locate("Shared.dll"), Some(b"shared-net6".to_vec()));
        assert_eq!(source.locate("Unknown.dll"), None);
    }

    #[test]
    fn test_get_file_shared_and_own() {
        let source = source(vec![pkg_a(), pkg_b()]);

        let logo = source.get_file(&ContentPath::parse("_content/pkgB/logo.png").unwrap());
        assert_eq!(logo.map(read_all), Some(b"logo".to_vec()));

        let css = source.get_file(&ContentPath::parse("app.css").unwrap());
        assert_eq!(css.map(read_all), Some(b"own-css".to_vec()));

        assert!(
            source
                .get_file(&ContentPath::parse("_content/pkgC/logo.png").unwrap())
                .is_none()
        );
        assert!(
            source
                .get_file(&ContentPath::parse("missing.css").unwrap())
                .is_none()
        );
    }

    #[test]
    fn test_get_file_with_corrupted_entry_is_not_found() {
        let mut broken = MockPackageArchive::new();
        broken.expect_id().return_const("PkgA".to_string());
        broken
            .expect_read_entry()
            .returning(|_| Err(anyhow!("invalid deflate data")));

        let source = source(vec![Arc::new(broken), pkg_b()]);
        assert!(
            source
                .get_file(&ContentPath::parse("app.css").unwrap())
                .is_none()
        );
        let logo = source.get_file(&ContentPath::parse("_content/pkgB/logo.png").unwrap());
        assert_eq!(logo.map(read_all), Some(b"logo".to_vec()));
    }

    #[test]
    fn test_archive_lookup_ignores_case() {
        let source = source(vec![pkg_a(), pkg_b()]);
        assert!(source.archive("PKGB").is_some());
        assert_eq!(source.archive_ids().collect::<Vec<_>>(), vec!["PkgA", "pkgB"]);
    }
}

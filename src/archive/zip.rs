use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use log::debug;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use zip::ZipArchive;
use zip::result::ZipError;

use super::{ArchiveManifest, LIB_DIR, MANIFEST_ENTRY, PackageArchive};
use crate::framework::{CompatibilityProfile, FrameworkGroup, TargetFramework};
use crate::runtime::Runtime;

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_ENTRY_PREALLOCATION: u64 = 1 << 20;

/// A zip-packaged component archive held in memory.
///
/// The central directory is parsed once to build the library item profile;
/// every entry read re-opens the archive over the shared buffer so reads are
/// independent of each other.
pub struct ZipPackageArchive {
    manifest: ArchiveManifest,
    profile: CompatibilityProfile,
    data: Arc<[u8]>,
}

impl ZipPackageArchive {
    /// Open an archive whose identity comes from its `manifest.json`.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::build(data, None)
    }

    /// Open an archive with a caller-supplied identity; the manifest is optional.
    pub fn from_bytes_with_identity(
        data: Vec<u8>,
        id: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self> {
        let manifest = ArchiveManifest {
            id: id.into(),
            version: version.into(),
        };
        Self::build(data, Some(manifest))
    }

    #[tracing::instrument(skip(runtime))]
    pub fn open<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        let data = runtime
            .read(path)
            .with_context(|| format!("Failed to read archive {:?}", path))?;
        Self::from_bytes(data).with_context(|| format!("Failed to open archive {:?}", path))
    }

    #[tracing::instrument(skip(runtime))]
    pub fn open_with_identity<R: Runtime + ?Sized>(
        runtime: &R,
        path: &Path,
        id: &str,
        version: &str,
    ) -> Result<Self> {
        let data = runtime
            .read(path)
            .with_context(|| format!("Failed to read archive {:?}", path))?;
        Self::from_bytes_with_identity(data, id, version)
            .with_context(|| format!("Failed to open archive {:?}", path))
    }

    fn build(data: Vec<u8>, identity: Option<ArchiveManifest>) -> Result<Self> {
        let data: Arc<[u8]> = data.into();
        let (manifest, profile) = {
            let mut archive = ZipArchive::new(Cursor::new(&data[..]))
                .with_context(|| "Failed to parse ZIP archive")?;

            let manifest = match identity {
                Some(manifest) => manifest,
                None => Self::read_manifest(&mut archive)?
                    .ok_or_else(|| anyhow!("Archive has no {} entry", MANIFEST_ENTRY))?,
            };
            (manifest, Self::collect_lib_groups(archive.file_names()))
        };
        debug!(
            "Opened archive {} {} with {} framework group(s)",
            manifest.id,
            manifest.version,
            profile.groups().len() + usize::from(profile.fallback().is_some())
        );

        Ok(Self {
            manifest,
            profile,
            data,
        })
    }

    fn read_manifest(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Option<ArchiveManifest>> {
        let mut entry = match archive.by_name(MANIFEST_ENTRY) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e).context("Failed to read archive manifest"),
        };
        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .context("Failed to read archive manifest")?;
        let manifest = serde_json::from_str(&content).context("Malformed archive manifest")?;
        Ok(Some(manifest))
    }

    /// Group `lib/<moniker>/<file>` entries by moniker, first-seen order.
    /// Items directly under `lib/` form the agnostic group.
    fn collect_lib_groups<'a>(names: impl Iterator<Item = &'a str>) -> CompatibilityProfile {
        let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();

        for name in names {
            let Some(rest) = name
                .strip_prefix(LIB_DIR)
                .and_then(|r| r.strip_prefix('/'))
            else {
                continue;
            };
            if rest.is_empty() || rest.ends_with('/') {
                continue;
            }

            let moniker = match rest.split_once('/') {
                Some((moniker, _)) => moniker,
                None => "any",
            };
            groups
                .entry(moniker.to_string())
                .or_default()
                .push(name.to_string());
        }

        CompatibilityProfile::from_groups(
            groups
                .into_iter()
                .map(|(moniker, items)| FrameworkGroup::new(TargetFramework::parse(&moniker), items)),
        )
    }
}

impl PackageArchive for ZipPackageArchive {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn profile(&self) -> &CompatibilityProfile {
        &self.profile
    }

    fn read_entry(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let path = path.trim_start_matches('/');
        let mut archive = ZipArchive::new(Cursor::new(&self.data[..]))
            .with_context(|| format!("Failed to parse archive {}", self.manifest.id))?;

        let mut entry = match archive.by_name(path) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to locate entry {:?}", path));
            }
        };
        if entry.is_dir() {
            return Ok(None);
        }

        let mut buffer = Vec::with_capacity(entry.size().min(MAX_ENTRY_PREALLOCATION) as usize);
        entry
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read entry {:?}", path))?;
        Ok(Some(buffer))
    }
}

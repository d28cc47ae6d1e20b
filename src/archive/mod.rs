//! Versioned component archives.
//!
//! An archive exposes its identity, the library item groups it ships per
//! target framework, and random access to its entries. Entry reads return
//! `Ok(None)` for absent entries and `Err` for unreadable ones; callers that
//! search several sources treat both as "no match" via [`read_optional`].

mod zip;

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::framework::CompatibilityProfile;

pub use self::zip::ZipPackageArchive;

/// Name of the manifest entry at the archive root.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Virtual subtree holding an archive's static assets.
pub const STATIC_ASSETS_DIR: &str = "staticwebassets";

/// Directory holding library items grouped by target framework.
pub const LIB_DIR: &str = "lib";

/// Identity stored in an archive's manifest entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArchiveManifest {
    pub id: String,
    pub version: String,
}

/// Read access to one versioned component archive.
#[cfg_attr(test, mockall::automock)]
pub trait PackageArchive: Send + Sync {
    /// Package identifier from the manifest.
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Library item groups per target framework.
    fn profile(&self) -> &CompatibilityProfile;

    /// Read one entry into a fresh buffer.
    fn read_entry(&self, path: &str) -> Result<Option<Vec<u8>>>;
}

/// Read an entry, folding read errors into `None`.
pub fn read_optional(archive: &dyn PackageArchive, path: &str) -> Option<Vec<u8>> {
    match archive.read_entry(path) {
        Ok(data) => data,
        Err(e) => {
            debug!(
                "Ignoring unreadable entry {:?} in archive {}: {:#}",
                path,
                archive.id(),
                e
            );
            None
        }
    }
}

/// Path of a static asset inside an archive.
pub fn static_asset_entry(path: &str) -> String {
    format!("{}/{}", STATIC_ASSETS_DIR, path.trim_start_matches('/'))
}

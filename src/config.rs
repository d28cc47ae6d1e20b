//! Host configuration injected once at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::framework::TargetFramework;
use crate::runtime::Runtime;

pub const DEFAULT_TARGET_FRAMEWORK: &str = "net8.0";
pub const DEFAULT_MODULE_EXTENSION: &str = ".dll";
pub const DEFAULT_APP_NAME: &str = "pilet-orchestrator";
pub const DEFAULT_APP_VERSION: &str = "0.0.0";

/// Identity of the hosting application, reported by the debug snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppIdentity {
    pub name: String,
    pub version: String,
}

impl AppIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_APP_NAME, DEFAULT_APP_VERSION)
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub app: AppIdentity,
    /// Framework the host runs on; library items are resolved against it
    pub target_framework: TargetFramework,
    /// Local cache holding dependency archives of locally built packages
    pub archive_cache: PathBuf,
    /// File extension appended to module names when locating library items
    pub module_extension: String,
}

impl HostConfig {
    pub fn new(
        app: AppIdentity,
        target_framework: TargetFramework,
        archive_cache: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app,
            target_framework,
            archive_cache: archive_cache.into(),
            module_extension: DEFAULT_MODULE_EXTENSION.to_string(),
        }
    }

    /// Default archive cache: `$NUGET_PACKAGES`, else `~/.nuget/packages`.
    pub fn default_archive_cache<R: Runtime + ?Sized>(runtime: &R) -> Option<PathBuf> {
        if let Ok(dir) = runtime.env_var("NUGET_PACKAGES")
            && !dir.is_empty()
        {
            return Some(PathBuf::from(dir));
        }
        runtime
            .home_dir()
            .map(|home| home.join(".nuget").join("packages"))
    }
}

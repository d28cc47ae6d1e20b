//! Wiring of repository, discovery and debug surface for one host process.

use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::HostConfig;
use crate::debug::{BroadcastEventBus, DebugConnector};
use crate::package::{DirectoryLocator, Repository};
use crate::runtime::Runtime;

/// Directories packages are discovered in.
#[derive(Debug, Clone, Default)]
pub struct PackageDirs {
    /// Searched recursively for local build output
    pub local: Vec<PathBuf>,
    /// Holding component archives, one package per file or subdirectory
    pub archives: Vec<PathBuf>,
}

/// A running host: the connector and the bus its events go to.
pub struct Host {
    pub connector: Arc<DebugConnector>,
    pub events: Arc<BroadcastEventBus>,
}

impl Host {
    /// Discover and register every package in `dirs`.
    ///
    /// Packages that fail to initialize are skipped; the host starts with
    /// whatever came online.
    pub fn start(runtime: Arc<dyn Runtime>, config: HostConfig, dirs: PackageDirs) -> Self {
        let config = Arc::new(config);
        let locator = Arc::new(DirectoryLocator::new(
            Arc::clone(&runtime),
            dirs.local,
            dirs.archives,
            config.module_extension.clone(),
        ));

        let repository = Arc::new(Repository::new(runtime, Arc::clone(&config)));
        let added = repository.load_all(locator.discover());
        info!(
            "Registered {} package(s) for {} {} on {}",
            added, config.app.name, config.app.version, config.target_framework
        );

        let events = Arc::new(BroadcastEventBus::default());
        let connector = DebugConnector::new(
            repository,
            events.clone(),
            config.app.clone(),
        )
        .with_locator(locator);

        Self {
            connector: Arc::new(connector),
            events,
        }
    }
}

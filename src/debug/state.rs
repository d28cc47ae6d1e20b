use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppIdentity;
use crate::package::{ComponentName, Package};

/// Snapshot of the repository as reported by the debug surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DebugState {
    pub app: AppIdentity,
    pub extensions: Vec<String>,
    pub dependencies: Vec<String>,
    pub pilets: Vec<PiletInfo>,
    pub routes: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PiletInfo {
    pub name: String,
    pub version: String,
    pub disabled: bool,
    pub dependencies: Vec<String>,
}

impl DebugState {
    /// Collect the snapshot in a single pass over `packages`.
    ///
    /// A package torn down while its entry module was being read is left
    /// out entirely.
    pub fn collect<'a>(app: AppIdentity, packages: impl IntoIterator<Item = &'a Package>) -> Self {
        let mut state = Self {
            app,
            extensions: Vec::new(),
            dependencies: Vec::new(),
            pilets: Vec::new(),
            routes: Vec::new(),
        };

        for package in packages {
            let components = package.components();
            let dependencies = package.dependencies();
            if package.context().is_disposed() {
                continue;
            }

            for component in components {
                match component {
                    ComponentName::Route(route) => state.routes.push(route),
                    ComponentName::Extension(name) => state.extensions.push(name),
                }
            }
            for dependency in &dependencies {
                if !state.dependencies.contains(dependency) {
                    state.dependencies.push(dependency.clone());
                }
            }

            state.pilets.push(PiletInfo {
                name: package.name().to_string(),
                version: package.version().to_string(),
                disabled: package.is_disabled(),
                dependencies,
            });
        }

        state
    }
}

/// Body of `POST /_debug/event`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EventRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PiletMode {
    Add,
    Update,
    Remove,
    #[serde(other)]
    Unknown,
}

/// Body of `POST /_debug/pilet`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PiletRequest {
    pub mode: Option<PiletMode>,
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}
